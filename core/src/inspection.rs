//! Fill-ratio inspection of the latest camera frame at a saved position.

use crate::cancel::{ActiveRun, CancelToken, RunFlag, RunGuard};
use crate::config::RigConfig;
use crate::machine::MachineDriver;
use crate::prelude::{RigError, RigResult};
use crate::telemetry::{Event, EventSink, VerificationProgress, VerificationStatus};
use crate::vision::{evaluate, GrayFrame, RoiResult};
use log::info;
use serde_json::{json, Value};
use std::sync::{Arc, RwLock};

/// Latest grayscale frame published by the camera loop.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: RwLock<Option<Arc<GrayFrame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: GrayFrame) {
        let mut latest = self
            .latest
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *latest = Some(Arc::new(frame));
    }

    pub fn latest(&self) -> Option<Arc<GrayFrame>> {
        match self.latest.read() {
            Ok(latest) => latest.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    Completed(Vec<RoiResult>),
    Cancelled,
    Failed(String),
}

impl VerificationOutcome {
    pub fn passed(&self) -> bool {
        match self {
            VerificationOutcome::Completed(results) => results.iter().all(|r| r.success),
            _ => false,
        }
    }
}

pub struct Inspector {
    driver: Arc<MachineDriver>,
    frames: Arc<FrameSlot>,
    sink: Arc<dyn EventSink>,
    active: RunFlag,
    runs: ActiveRun,
}

impl Inspector {
    pub fn new(driver: Arc<MachineDriver>, frames: Arc<FrameSlot>, sink: Arc<dyn EventSink>) -> Self {
        Self {
            driver,
            frames,
            sink,
            active: RunFlag::new(),
            runs: ActiveRun::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_active()
    }

    pub fn begin(&self) -> RigResult<RunGuard> {
        let guard = self
            .active
            .try_acquire()
            .ok_or(RigError::AlreadyRunning("verification"))?;
        self.runs.arm();
        Ok(guard)
    }

    /// Stops the current run without touching the caller's token.
    pub fn stop(&self) -> bool {
        self.runs.stop()
    }

    pub fn run(&self, config: &RigConfig, cancel: &CancelToken) -> RigResult<VerificationOutcome> {
        let guard = self.begin()?;
        Ok(self.run_with(&guard, config, cancel))
    }

    pub fn run_with(
        &self,
        _guard: &RunGuard,
        config: &RigConfig,
        cancel: &CancelToken,
    ) -> VerificationOutcome {
        let token = self.runs.token();
        cancel.link(&token);
        let result = self.execute(config, &token);
        self.runs.clear();
        match result {
            Ok(outcome) => outcome,
            Err(message) => {
                self.emit(VerificationStatus::Error, &message, None);
                VerificationOutcome::Failed(message)
            }
        }
    }

    fn emit(&self, status: VerificationStatus, message: &str, data: Option<Value>) {
        info!("verification: {}", message);
        self.sink.emit(Event::VerificationUpdate(VerificationProgress {
            status,
            message: message.to_string(),
            data,
        }));
    }

    fn execute(&self, config: &RigConfig, cancel: &CancelToken) -> Result<VerificationOutcome, String> {
        let spec = &config.verification;
        let settle = config.scenario_timing.verification_settle();
        self.emit(VerificationStatus::Running, "starting verification", None);
        if spec.boxes.is_empty() {
            return Err("no verification boxes defined".into());
        }

        let base_name = spec.base_name.trim();
        if base_name.is_empty() {
            self.emit(
                VerificationStatus::Info,
                "no verification position selected, using current position",
                None,
            );
        } else if let Some(base) = config.base(base_name) {
            self.emit(
                VerificationStatus::Running,
                &format!("moving to '{}'", base_name),
                None,
            );
            self.driver
                .goto_z_safe(base.x, base.y, base.z)
                .map_err(|err| format!("move to '{}' failed: {}", base_name, err))?;
            if cancel.sleep(settle) {
                return Ok(self.cancelled());
            }
        } else {
            self.emit(
                VerificationStatus::Warning,
                &format!("verification position '{}' not found, using current position", base_name),
                None,
            );
        }

        self.emit(VerificationStatus::Running, "stabilizing image", None);
        if cancel.sleep(settle) {
            return Ok(self.cancelled());
        }
        let frame = self
            .frames
            .latest()
            .ok_or_else(|| "no camera frame available".to_string())?;

        let results = evaluate(&frame, &spec.boxes, spec.threshold);
        let total = results.len();
        for (index, result) in results.iter().enumerate() {
            self.emit(
                VerificationStatus::BoxProgress,
                &format!("box {}/{}: {} -> {:.1}%", index + 1, total, result.name, result.ratio),
                Some(json!({
                    "box_index": index,
                    "name": result.name,
                    "ratio": result.ratio,
                    "success": result.success,
                    "target": result.target,
                })),
            );
        }
        let passed = results.iter().filter(|result| result.success).count();
        self.emit(
            VerificationStatus::Done,
            &format!("verification complete ({}/{} passed)", passed, total),
            serde_json::to_value(&results).ok(),
        );
        Ok(VerificationOutcome::Completed(results))
    }

    fn cancelled(&self) -> VerificationOutcome {
        self.emit(VerificationStatus::Warning, "verification cancelled", None);
        VerificationOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MotionConfig, SavedPosition, ScenarioTiming};
    use crate::telemetry::{ErrorLog, MemorySink, Reporter};
    use crate::vision::{Roi, VerificationSpec};
    use ndarray::Array2;

    fn inspector() -> (Inspector, Arc<FrameSlot>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let reporter = Reporter::new(Arc::new(ErrorLog::new()), sink.clone());
        let driver = Arc::new(MachineDriver::new(MotionConfig::default(), reporter));
        let frames = Arc::new(FrameSlot::new());
        (Inspector::new(driver, frames.clone(), sink.clone()), frames, sink)
    }

    fn config(base_name: &str) -> RigConfig {
        RigConfig {
            verification: VerificationSpec {
                base_name: base_name.into(),
                boxes: vec![
                    Roi {
                        id: 1,
                        name: "left".into(),
                        x: 0.0,
                        y: 0.0,
                        w: 0.5,
                        h: 1.0,
                        target_ratio: 90.0,
                    },
                    Roi {
                        id: 2,
                        name: "right".into(),
                        x: 0.5,
                        y: 0.0,
                        w: 0.5,
                        h: 1.0,
                        target_ratio: 90.0,
                    },
                ],
                threshold: 127,
            },
            scenario_timing: ScenarioTiming {
                step_pause_ms: 0,
                verification_settle_ms: 0,
            },
            ..RigConfig::default()
        }
    }

    fn statuses(sink: &MemorySink) -> Vec<VerificationStatus> {
        sink.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::VerificationUpdate(progress) => Some(progress.status),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn missing_frame_is_an_error() {
        let (inspector, _frames, sink) = inspector();
        let outcome = inspector.run(&config(""), &CancelToken::new()).unwrap();
        assert!(matches!(outcome, VerificationOutcome::Failed(_)));
        assert_eq!(statuses(&sink).last(), Some(&VerificationStatus::Error));
        assert!(!inspector.is_running());
    }

    #[test]
    fn boxes_are_reported_one_by_one() {
        let (inspector, frames, sink) = inspector();
        frames.publish(Array2::from_shape_fn((10, 20), |(_, col)| if col < 10 { 0 } else { 255 }));
        let outcome = inspector.run(&config("nowhere"), &CancelToken::new()).unwrap();
        let VerificationOutcome::Completed(results) = &outcome else {
            panic!("unexpected {outcome:?}");
        };
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(!outcome.passed());
        let statuses = statuses(&sink);
        assert!(statuses.contains(&VerificationStatus::Warning));
        assert_eq!(
            statuses
                .iter()
                .filter(|status| **status == VerificationStatus::BoxProgress)
                .count(),
            2
        );
        assert_eq!(statuses.last(), Some(&VerificationStatus::Done));
    }

    #[test]
    fn saved_position_is_visited_first() {
        let (inspector, frames, _sink) = inspector();
        frames.publish(Array2::zeros((4, 4)));
        let mut config = config("camera");
        config.bases.push(SavedPosition {
            name: "camera".into(),
            x: 12.0,
            y: 8.0,
            z: -40.0,
        });
        let outcome = inspector.run(&config, &CancelToken::new()).unwrap();
        assert!(outcome.passed());
        let position = inspector.driver.state().position;
        assert_eq!((position.x, position.y, position.z), (12.0, 8.0, -40.0));
    }

    #[test]
    fn concurrent_run_is_rejected() {
        let (inspector, _frames, _sink) = inspector();
        let _guard = inspector.begin().unwrap();
        assert!(matches!(
            inspector.run(&config(""), &CancelToken::new()),
            Err(RigError::AlreadyRunning("verification"))
        ));
    }
}
