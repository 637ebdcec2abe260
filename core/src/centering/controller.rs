use crate::cancel::{ActiveRun, CancelToken, RunFlag, RunGuard};
use crate::centering::patterns::{self, ScanPattern};
use crate::centering::{CenteringPhase, TargetSource};
use crate::config::{CalibrationConfig, CenteringTiming, RigConfig};
use crate::geometry::Point;
use crate::machine::MachineDriver;
use crate::prelude::{RigError, RigResult};
use crate::telemetry::{CenteringProgress, Event, EventSink, ProgressStatus};
use crate::vision::{Detection, TargetSelector};
use log::info;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Per-run parameters, taken from one configuration snapshot.
#[derive(Debug, Clone)]
pub struct CenteringSettings {
    pub calibration: CalibrationConfig,
    pub timing: CenteringTiming,
    /// Where the target should end up.
    pub reference: Point,
    /// Tie-break point when several detections match.
    pub origin: Point,
}

impl CenteringSettings {
    pub fn from_config(config: &RigConfig) -> Self {
        Self {
            calibration: config.calibration.clone(),
            timing: config.centering_timing.clone(),
            reference: config.camera.reference_point(),
            origin: config.camera.frame_center(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CenteringOutcome {
    /// Converged; `final_error_px` is `None` when the final check saw nothing.
    Centered { final_error_px: Option<f64> },
    NotFound,
    NotConverged,
    Cancelled,
    Failed(String),
}

impl CenteringOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CenteringOutcome::Centered { .. })
    }
}

enum Halt {
    Cancelled,
    Fault(String),
}

/// Pixel error of `target` relative to `reference`.
fn pixel_error(target: &Detection, reference: Point) -> (i32, i32) {
    (target.center.x - reference.x, target.center.y - reference.y)
}

fn magnitude(dx: i32, dy: i32) -> f64 {
    f64::from(dx).hypot(f64::from(dy))
}

/// Closed-loop centering: acquire, coarse, transition, fine, final check.
///
/// A run blocks its calling thread; callers that must stay responsive
/// spawn it on a worker and cancel through the token.
pub struct CenteringController {
    driver: Arc<MachineDriver>,
    source: Arc<dyn TargetSource>,
    sink: Arc<dyn EventSink>,
    active: RunFlag,
    runs: ActiveRun,
    status: RwLock<String>,
}

impl CenteringController {
    pub fn new(
        driver: Arc<MachineDriver>,
        source: Arc<dyn TargetSource>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            driver,
            source,
            sink,
            active: RunFlag::new(),
            runs: ActiveRun::new(),
            status: RwLock::new(String::new()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_active()
    }

    /// Last progress message, for status broadcasts.
    pub fn status_message(&self) -> String {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Claims the "centering in progress" flag for a run started later.
    pub fn begin(&self) -> RigResult<RunGuard> {
        let guard = self
            .active
            .try_acquire()
            .ok_or(RigError::AlreadyRunning("auto-center"))?;
        self.runs.arm();
        Ok(guard)
    }

    /// Stops the current run, whoever started it. The caller's own token
    /// stays untouched, so a scenario can carry on with its next step.
    pub fn stop(&self) -> bool {
        self.runs.stop()
    }

    pub fn run(
        &self,
        selector: &TargetSelector,
        settings: &CenteringSettings,
        cancel: &CancelToken,
    ) -> RigResult<CenteringOutcome> {
        let guard = self.begin()?;
        Ok(self.run_with(&guard, selector, settings, cancel))
    }

    /// Runs with a flag already claimed through [`CenteringController::begin`].
    pub fn run_with(
        &self,
        _guard: &RunGuard,
        selector: &TargetSelector,
        settings: &CenteringSettings,
        cancel: &CancelToken,
    ) -> CenteringOutcome {
        let token = self.runs.token();
        cancel.link(&token);
        let run = CenteringRun {
            controller: self,
            selector,
            settings,
            cancel: &token,
        };
        let result = run.execute();
        self.runs.clear();
        match result {
            Ok(outcome) => outcome,
            Err(Halt::Cancelled) => {
                self.emit(CenteringPhase::Done, ProgressStatus::Error, "centering cancelled");
                CenteringOutcome::Cancelled
            }
            Err(Halt::Fault(message)) => {
                self.emit(CenteringPhase::Done, ProgressStatus::Error, &message);
                CenteringOutcome::Failed(message)
            }
        }
    }

    fn emit(&self, phase: CenteringPhase, status: ProgressStatus, message: &str) {
        info!("auto-center [{}] {}", phase.label(), message);
        let mut current = self
            .status
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = format!("[{}] {}", phase.label(), message);
        drop(current);
        self.sink.emit(Event::AutoCenterUpdate(CenteringProgress {
            phase,
            status,
            message: message.to_string(),
        }));
    }
}

struct CenteringRun<'a> {
    controller: &'a CenteringController,
    selector: &'a TargetSelector,
    settings: &'a CenteringSettings,
    cancel: &'a CancelToken,
}

impl CenteringRun<'_> {
    fn emit(&self, phase: CenteringPhase, status: ProgressStatus, message: &str) {
        self.controller.emit(phase, status, message);
    }

    fn pause(&self, duration: Duration) -> Result<(), Halt> {
        if self.cancel.sleep(duration) {
            Err(Halt::Cancelled)
        } else {
            Ok(())
        }
    }

    fn locate(&self) -> Option<Detection> {
        self.controller
            .source
            .locate(self.selector, self.settings.origin)
    }

    /// Screen-space millimeters through the calibration mapping to a
    /// relative motor move.
    fn move_screen(&self, sx: f64, sy: f64) -> Result<(), Halt> {
        if self.cancel.is_cancelled() {
            return Err(Halt::Cancelled);
        }
        let (mx, my) = self.settings.calibration.axes().screen_to_motor(sx, sy);
        self.controller
            .driver
            .move_relative(mx, my, 0.0, None)
            .map_err(|err| Halt::Fault(format!("centering move failed: {}", err)))
    }

    /// Waits for the tracker, then walks `pattern` re-querying after each move.
    fn search(
        &self,
        phase: CenteringPhase,
        waits: usize,
        pattern: Option<ScanPattern>,
    ) -> Result<Option<Detection>, Halt> {
        let timing = &self.settings.timing;
        for attempt in 0..waits {
            self.pause(timing.poll_interval())?;
            if let Some(target) = self.locate() {
                return Ok(Some(target));
            }
            self.emit(
                phase,
                ProgressStatus::Moving,
                &format!("waiting for OCR ({}/{})", attempt + 1, waits),
            );
        }

        let Some(pattern) = pattern else {
            return Ok(None);
        };
        let steps = pattern.len();
        self.emit(
            phase,
            ProgressStatus::Moving,
            &format!("target not visible, scanning ({} steps)", steps),
        );
        for (index, (sx, sy)) in pattern.into_iter().enumerate() {
            self.move_screen(sx, sy)?;
            self.pause(timing.poll_interval())?;
            if let Some(target) = self.locate() {
                self.emit(
                    phase,
                    ProgressStatus::Moving,
                    &format!("target found (scan step {}/{})", index + 1, steps),
                );
                return Ok(Some(target));
            }
            if (index + 1) % 4 == 0 {
                self.emit(
                    phase,
                    ProgressStatus::Moving,
                    &format!("scanning ({}/{})", index + 1, steps),
                );
            }
        }
        Ok(None)
    }

    fn execute(&self) -> Result<CenteringOutcome, Halt> {
        let calibration = &self.settings.calibration;
        let timing = &self.settings.timing;
        let label = self.selector.describe();

        // acquire
        self.emit(
            CenteringPhase::Acquire,
            ProgressStatus::Started,
            &format!("searching for '{}'", label),
        );
        self.pause(timing.start_settle())?;
        let target = match self.locate() {
            Some(target) => Some(target),
            None => {
                self.emit(
                    CenteringPhase::Acquire,
                    ProgressStatus::Moving,
                    &format!("'{}' not in view, starting wide scan", label),
                );
                self.search(
                    CenteringPhase::Acquire,
                    timing.acquire_waits,
                    Some(patterns::wide_scan(calibration.wide_scan_step_mm)),
                )?
            }
        };
        let Some(target) = target else {
            self.emit(
                CenteringPhase::Acquire,
                ProgressStatus::Error,
                &format!("'{}' not found anywhere", label),
            );
            return Ok(CenteringOutcome::NotFound);
        };
        self.emit(
            CenteringPhase::Acquire,
            ProgressStatus::Moving,
            &format!(
                "target found at ({},{}), centering",
                target.center.x, target.center.y
            ),
        );
        self.pause(timing.start_settle())?;

        // coarse
        self.emit(CenteringPhase::Coarse, ProgressStatus::Moving, "coarse centering");
        let tolerance = calibration.coarse_tolerance_px;
        let mut converged = false;
        for iteration in 0..calibration.max_iterations {
            self.pause(timing.iteration_settle())?;
            let target = match self.locate() {
                Some(target) => target,
                None => {
                    self.emit(
                        CenteringPhase::Coarse,
                        ProgressStatus::Moving,
                        &format!("target lost, searching (iteration {})", iteration + 1),
                    );
                    let pattern = (iteration < timing.small_scan_iterations)
                        .then(|| patterns::small_scan(calibration.scan_step_mm));
                    match self.search(CenteringPhase::Coarse, timing.reacquire_waits, pattern)? {
                        Some(target) => target,
                        None => {
                            self.emit(
                                CenteringPhase::Coarse,
                                ProgressStatus::Error,
                                &format!("target lost and not re-acquired ({})", label),
                            );
                            return Ok(CenteringOutcome::NotFound);
                        }
                    }
                }
            };

            let (dx, dy) = pixel_error(&target, self.settings.reference);
            self.emit(
                CenteringPhase::Coarse,
                ProgressStatus::Moving,
                &format!(
                    "iteration {}: error {:.0}px (dx={}, dy={})",
                    iteration + 1,
                    magnitude(dx, dy),
                    dx,
                    dy
                ),
            );
            if dx.abs() <= tolerance && dy.abs() <= tolerance {
                self.emit(
                    CenteringPhase::Coarse,
                    ProgressStatus::Moving,
                    &format!("coarse centering complete ({:.0}px)", magnitude(dx, dy)),
                );
                converged = true;
                break;
            }

            self.move_screen(
                f64::from(dx) * calibration.pixel_to_mm_x,
                f64::from(dy) * calibration.pixel_to_mm_y,
            )?;
            self.emit(CenteringPhase::Coarse, ProgressStatus::Moving, "stabilizing");
            self.pause(timing.stabilization())?;
        }
        if !converged {
            self.emit(
                CenteringPhase::Coarse,
                ProgressStatus::Error,
                "coarse centering failed, iteration limit reached",
            );
            return Ok(CenteringOutcome::NotConverged);
        }

        self.emit(
            CenteringPhase::Transition,
            ProgressStatus::Moving,
            "settling before fine centering",
        );
        self.pause(timing.transition())?;

        if calibration.fine_tune_enabled {
            self.fine_phase()?;
        }

        // final check
        self.emit(CenteringPhase::Check, ProgressStatus::Moving, "final check");
        self.pause(timing.final_check())?;
        let outcome = match self.locate() {
            Some(target) => {
                let (dx, dy) = pixel_error(&target, self.settings.reference);
                let error = magnitude(dx, dy);
                self.emit(
                    CenteringPhase::Done,
                    ProgressStatus::Done,
                    &format!("centered '{}', error {:.1}px", label, error),
                );
                CenteringOutcome::Centered {
                    final_error_px: Some(error),
                }
            }
            None => {
                self.emit(
                    CenteringPhase::Done,
                    ProgressStatus::Done,
                    "centered, verification unavailable",
                );
                CenteringOutcome::Centered {
                    final_error_px: None,
                }
            }
        };
        Ok(outcome)
    }

    /// Clamped small corrections; losing the target ends the phase early.
    fn fine_phase(&self) -> Result<(), Halt> {
        let calibration = &self.settings.calibration;
        let timing = &self.settings.timing;
        let tolerance = calibration.fine_tolerance_px();
        let step = calibration.fine_tune_step_mm.abs();
        self.emit(CenteringPhase::Fine, ProgressStatus::Moving, "fine centering");

        for iteration in 0..calibration.fine_iterations {
            self.pause(timing.iteration_settle())?;
            let target = match self.locate() {
                Some(target) => target,
                None => {
                    self.emit(
                        CenteringPhase::Fine,
                        ProgressStatus::Moving,
                        "target lost during fine centering, waiting",
                    );
                    match self.search(CenteringPhase::Fine, timing.fine_reacquire_waits, None)? {
                        Some(target) => target,
                        None => {
                            self.emit(
                                CenteringPhase::Fine,
                                ProgressStatus::Moving,
                                "target lost, keeping current position",
                            );
                            return Ok(());
                        }
                    }
                }
            };

            let (dx, dy) = pixel_error(&target, self.settings.reference);
            self.emit(
                CenteringPhase::Fine,
                ProgressStatus::Moving,
                &format!(
                    "correction {}: error {:.1}px",
                    iteration + 1,
                    magnitude(dx, dy)
                ),
            );
            if dx.abs() <= tolerance && dy.abs() <= tolerance {
                self.emit(
                    CenteringPhase::Fine,
                    ProgressStatus::Moving,
                    &format!("fine centering complete ({:.1}px)", magnitude(dx, dy)),
                );
                return Ok(());
            }

            let sx = (f64::from(dx) * calibration.pixel_to_mm_x).clamp(-step, step);
            let sy = (f64::from(dy) * calibration.pixel_to_mm_y).clamp(-step, step);
            self.move_screen(sx, sy)?;
            self.pause(timing.fine_settle())?;
        }
        Ok(())
    }
}
