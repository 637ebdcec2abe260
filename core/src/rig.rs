//! Owned context wiring driver, tracker, centering, inspection and
//! scenarios together behind one command surface.

use crate::cancel::CancelToken;
use crate::centering::{CenteringController, CenteringOutcome, CenteringSettings, TargetSource};
use crate::config::{ConfigStore, RigConfig};
use crate::inspection::{FrameSlot, Inspector, VerificationOutcome};
use crate::machine::{protocol, MachineDriver, MachineState, MoveOrder, Transport};
use crate::prelude::{RigError, RigResult};
use crate::scenario::{ScenarioEngine, ScenarioOutcome};
use crate::telemetry::{spawn_status_broadcaster, ErrorEntry, ErrorLog, EventSink, Reporter, StatusSnapshot};
use crate::vision::{prepare_detections, Detection, OcrWord, StabilityTracker, TargetRequest, TargetSelector};
use log::{info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const ERROR_HISTORY_LIMIT: usize = 50;

/// Motor axis addressed by a calibration jog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

pub struct Rig {
    config: Arc<ConfigStore>,
    driver: Arc<MachineDriver>,
    tracker: Arc<StabilityTracker>,
    frames: Arc<FrameSlot>,
    centering: Arc<CenteringController>,
    inspector: Arc<Inspector>,
    scenarios: Arc<ScenarioEngine>,
    reporter: Reporter,
}

impl Rig {
    pub fn new(config: RigConfig, sink: Arc<dyn EventSink>) -> Self {
        let reporter = Reporter::new(Arc::new(ErrorLog::new()), Arc::clone(&sink));
        let driver = Arc::new(MachineDriver::new(config.motion.clone(), reporter.clone()));
        let tracker = Arc::new(StabilityTracker::new(config.tracker.clone()));
        let frames = Arc::new(FrameSlot::new());
        let source: Arc<dyn TargetSource> = Arc::clone(&tracker) as Arc<dyn TargetSource>;
        let centering = Arc::new(CenteringController::new(
            Arc::clone(&driver),
            source,
            Arc::clone(&sink),
        ));
        let inspector = Arc::new(Inspector::new(
            Arc::clone(&driver),
            Arc::clone(&frames),
            Arc::clone(&sink),
        ));
        let config = Arc::new(ConfigStore::new(config));
        let scenarios = Arc::new(ScenarioEngine::new(
            Arc::clone(&driver),
            Arc::clone(&centering),
            Arc::clone(&inspector),
            Arc::clone(&config),
            sink,
        ));
        Self {
            config,
            driver,
            tracker,
            frames,
            centering,
            inspector,
            scenarios,
            reporter,
        }
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn driver(&self) -> &Arc<MachineDriver> {
        &self.driver
    }

    pub fn tracker(&self) -> &Arc<StabilityTracker> {
        &self.tracker
    }

    pub fn frames(&self) -> &Arc<FrameSlot> {
        &self.frames
    }

    /// Swaps the whole configuration and pushes the motion and tracker
    /// parts into their long-lived owners.
    pub fn apply_config(&self, config: RigConfig) {
        self.driver.configure(config.motion.clone());
        self.tracker.configure(config.tracker.clone());
        self.config.replace(config);
        info!("configuration replaced");
    }

    // connection

    /// Discovers the controller; homes afterwards when `auto_home` is set.
    pub fn connect(&self) -> bool {
        let config = self.config.snapshot();
        let connected = self.driver.connect(&config.discovery);
        if connected && config.auto_home {
            info!("auto-home after connect");
            if let Err(err) = self.driver.home() {
                warn!("auto-home failed: {}", err);
            }
        }
        connected
    }

    pub fn attach(&self, transport: Box<dyn Transport>, label: &str) {
        self.driver.attach(transport, label);
    }

    pub fn home(&self) -> RigResult<()> {
        Ok(self.driver.home()?)
    }

    pub fn unlock(&self) -> RigResult<()> {
        Ok(self.driver.unlock()?)
    }

    pub fn soft_reset(&self) -> RigResult<()> {
        Ok(self.driver.soft_reset()?)
    }

    // motion

    /// Relative jog in screen millimeters, mapped through the calibration.
    pub fn move_screen(&self, dx: f64, dy: f64, dz: f64) -> RigResult<()> {
        let axes = self.config.snapshot().calibration.axes();
        let (mx, my) = axes.screen_to_motor(dx, dy);
        Ok(self.driver.move_relative(mx, my, dz, None)?)
    }

    pub fn move_absolute(&self, x: Option<f64>, y: Option<f64>, z: Option<f64>) -> RigResult<()> {
        Ok(self.driver.move_absolute(x, y, z, None)?)
    }

    pub fn move_absolute_z(&self, z: f64) -> RigResult<()> {
        Ok(self.driver.move_absolute_z(z, None)?)
    }

    /// Motor-space jog that skips the calibration mapping, used to find
    /// the right swap and negate flags.
    pub fn calibration_test(&self, axis: Axis, direction: i32, step: f64) -> RigResult<()> {
        let distance = step * f64::from(direction.signum());
        let (dx, dy) = match axis {
            Axis::X => (distance, 0.0),
            Axis::Y => (0.0, distance),
        };
        info!("calibration test {:?} {:+.3}mm", axis, distance);
        Ok(self.driver.move_relative(dx, dy, 0.0, None)?)
    }

    pub fn goto_base(&self, name: &str) -> RigResult<MoveOrder> {
        let config = self.config.snapshot();
        let base = config.base(name).ok_or_else(|| RigError::NotFound {
            kind: "base",
            name: name.to_string(),
        })?;
        Ok(self.driver.goto_z_safe(base.x, base.y, base.z)?)
    }

    pub fn pump(&self, on: bool) -> RigResult<()> {
        Ok(self.driver.pump(on)?)
    }

    /// Raw passthrough. `?`, `!` and Ctrl-X go out as real-time bytes.
    pub fn send_gcode(&self, command: &str) -> RigResult<()> {
        let command = command.trim();
        if command.is_empty() {
            return Err(RigError::InvalidRequest("empty command".into()));
        }
        let realtime = match command.as_bytes() {
            [protocol::STATUS_QUERY] => Some(protocol::STATUS_QUERY),
            [protocol::FEED_HOLD] => Some(protocol::FEED_HOLD),
            [protocol::SOFT_RESET] => Some(protocol::SOFT_RESET),
            _ => None,
        };
        match realtime {
            Some(protocol::STATUS_QUERY) => self.driver.query_status().map(|_| ())?,
            Some(protocol::SOFT_RESET) => self.driver.soft_reset()?,
            Some(byte) => self.driver.send_realtime(byte)?,
            None => self.driver.send(command)?,
        }
        Ok(())
    }

    pub fn query_status(&self) -> RigResult<MachineState> {
        Ok(self.driver.query_status()?)
    }

    /// Stops every running activity, then halts the machine.
    pub fn emergency_stop(&self) -> RigResult<()> {
        self.stop_all();
        Ok(self.driver.emergency_stop()?)
    }

    // vision

    /// Feeds one frame's worth of detections to the tracker.
    pub fn observe(&self, detections: &[Detection]) {
        self.tracker.update(detections);
    }

    /// Filters and corrects raw recognizer words, then tracks them.
    pub fn observe_words(&self, words: &[OcrWord], frame_width: i32, frame_height: i32) {
        let config = self.config.snapshot();
        let detections = prepare_detections(
            words,
            frame_width,
            frame_height,
            &config.ocr,
            &config.targeting.known_words(),
        );
        self.tracker.update(&detections);
    }

    // centering

    pub fn start_centering(&self, request: &TargetRequest) -> RigResult<JoinHandle<CenteringOutcome>> {
        let config = self.config.snapshot();
        let selector = TargetSelector::resolve(request, &config.targeting)?;
        let settings = CenteringSettings::from_config(&config);
        let guard = self.centering.begin()?;
        let centering = Arc::clone(&self.centering);
        info!("auto-center requested for '{}'", selector.describe());
        Ok(thread::spawn(move || {
            centering.run_with(&guard, &selector, &settings, &CancelToken::new())
        }))
    }

    /// Stops the running auto-center, including one driven by a scenario
    /// step; the scenario then moves on to its next step.
    pub fn stop_centering(&self) -> RigResult<()> {
        if self.centering.stop() {
            Ok(())
        } else {
            Err(RigError::NotRunning("auto-center"))
        }
    }

    // scenarios

    pub fn start_scenario(&self, name: &str) -> RigResult<JoinHandle<ScenarioOutcome>> {
        let config = self.config.snapshot();
        let scenario = config.scenario(name).ok_or_else(|| RigError::NotFound {
            kind: "scenario",
            name: name.to_string(),
        })?;
        self.scenarios.start(scenario.clone())
    }

    pub fn start_master_scenario(&self, name: &str) -> RigResult<JoinHandle<ScenarioOutcome>> {
        let config = self.config.snapshot();
        let master = config
            .master_scenario(name)
            .ok_or_else(|| RigError::NotFound {
                kind: "master scenario",
                name: name.to_string(),
            })?;
        self.scenarios.start(master.expand(&config.scenarios))
    }

    pub fn stop_scenario(&self) -> RigResult<()> {
        if self.scenarios.stop() {
            Ok(())
        } else {
            Err(RigError::NotRunning("scenario"))
        }
    }

    // verification

    pub fn run_verification(&self) -> RigResult<JoinHandle<VerificationOutcome>> {
        let guard = self.inspector.begin()?;
        let inspector = Arc::clone(&self.inspector);
        let config = self.config.snapshot();
        Ok(thread::spawn(move || {
            inspector.run_with(&guard, &config, &CancelToken::new())
        }))
    }

    // status

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            motor: self.driver.state(),
            ocr: self.tracker.snapshot(),
            auto_centering: self.centering.is_active(),
            auto_center_status: self.centering.status_message(),
            scenario_running: self.scenarios.is_running(),
        }
    }

    pub fn errors(&self) -> Vec<ErrorEntry> {
        self.reporter.history().recent(ERROR_HISTORY_LIMIT)
    }

    pub fn clear_errors(&self) {
        self.reporter.history().clear();
    }

    pub fn spawn_broadcaster(self: &Arc<Self>, interval: Duration, cancel: CancelToken) -> JoinHandle<()> {
        let rig = Arc::clone(self);
        spawn_status_broadcaster(interval, cancel, Arc::clone(self.reporter.sink()), move || {
            rig.status()
        })
    }

    /// Stops everything running and releases the port.
    pub fn shutdown(&self) {
        self.stop_all();
        self.driver.close();
    }

    fn stop_all(&self) {
        self.scenarios.stop();
        self.centering.stop();
        self.inspector.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MotionConfig, SavedPosition, ScenarioTiming};
    use crate::geometry::Rect;
    use crate::machine::{SimulatedController, SimulatedHandle};
    use crate::scenario::{MasterScenario, Scenario, Step};
    use crate::telemetry::{Event, MemorySink, ScenarioStatus};
    use crate::vision::Roi;
    use std::time::Instant;

    fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < limit {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        condition()
    }

    fn rig() -> (Arc<Rig>, SimulatedHandle, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let config = RigConfig {
            motion: MotionConfig {
                command_timeout_ms: 200,
                pump_off_repeat_delay_ms: 0,
                ..MotionConfig::default()
            },
            scenario_timing: ScenarioTiming {
                step_pause_ms: 0,
                verification_settle_ms: 0,
            },
            bases: vec![SavedPosition {
                name: "tray".into(),
                x: 5.0,
                y: 6.0,
                z: -30.0,
            }],
            scenarios: vec![
                Scenario {
                    name: "A".into(),
                    steps: vec![Step::PumpOn, Step::PumpOff],
                },
                Scenario {
                    name: "wait".into(),
                    steps: vec![Step::Delay { seconds: 10.0 }],
                },
                Scenario {
                    name: "seek".into(),
                    steps: vec![
                        Step::AutoCenter {
                            word: "GHOST".into(),
                        },
                        Step::PumpOn,
                    ],
                },
            ],
            master_scenarios: vec![MasterScenario {
                name: "twice".into(),
                sequence: vec!["A".into(), "missing".into(), "A".into()],
            }],
            ..RigConfig::default()
        };
        let rig = Arc::new(Rig::new(config, sink.clone()));
        let (controller, handle) = SimulatedController::new();
        rig.attach(Box::new(controller), "sim");
        handle.clear_log();
        (rig, handle, sink)
    }

    #[test]
    fn screen_moves_go_through_calibration() {
        let (rig, handle, _sink) = rig();
        rig.move_screen(1.0, 2.0, 0.0).unwrap();
        // calibration negates both axes, the driver then inverts X
        let position = handle.position();
        assert_eq!((position.x, position.y), (1.0, -2.0));
    }

    #[test]
    fn calibration_test_skips_the_screen_mapping() {
        let (rig, handle, _sink) = rig();
        rig.calibration_test(Axis::Y, -3, 2.0).unwrap();
        assert_eq!(handle.position().y, -2.0);
        assert_eq!(handle.position().x, 0.0);
    }

    #[test]
    fn unknown_names_are_reported() {
        let (rig, _handle, _sink) = rig();
        assert!(matches!(rig.goto_base("nowhere"), Err(RigError::NotFound { kind: "base", .. })));
        assert!(matches!(rig.start_scenario("nowhere"), Err(RigError::NotFound { .. })));
        assert!(matches!(rig.stop_scenario(), Err(RigError::NotRunning("scenario"))));
        assert!(matches!(
            rig.start_centering(&TargetRequest::Group("none".into())),
            Err(RigError::NotFound { .. })
        ));
    }

    #[test]
    fn goto_base_reaches_saved_position() {
        let (rig, handle, _sink) = rig();
        assert_eq!(rig.goto_base("tray").unwrap(), MoveOrder::XyThenZ);
        let position = handle.position();
        assert_eq!((position.x, position.y, position.z), (5.0, 6.0, -30.0));
    }

    #[test]
    fn master_scenario_runs_resolved_parts() {
        let (rig, handle, sink) = rig();
        let outcome = rig.start_master_scenario("twice").unwrap().join().unwrap();
        assert_eq!(outcome, ScenarioOutcome::Completed);
        assert_eq!(handle.commands().iter().filter(|c| *c == "M8").count(), 2);
        let total = sink.events().into_iter().find_map(|event| match event {
            Event::ScenarioUpdate(progress) => Some((progress.scenario_name, progress.total_steps)),
            _ => None,
        });
        assert_eq!(total, Some(("[M] twice".to_string(), 4)));
    }

    #[test]
    fn emergency_stop_halts_running_scenario() {
        let (rig, handle, _sink) = rig();
        let running = rig.start_scenario("wait").unwrap();
        thread::sleep(Duration::from_millis(50));
        assert!(rig.status().scenario_running);
        rig.emergency_stop().unwrap();
        assert_eq!(running.join().unwrap(), ScenarioOutcome::Stopped);
        assert_eq!(handle.realtime(), vec![protocol::FEED_HOLD]);
        let commands = handle.commands();
        assert_eq!(commands, vec!["M9".to_string(), "$X".to_string()]);
        assert!(!rig.status().scenario_running);
    }

    #[test]
    fn status_reflects_tracked_detections() {
        let (rig, _handle, _sink) = rig();
        rig.observe(&[Detection::new("TEST", Rect::new(100, 100, 40, 20))]);
        let status = rig.status();
        assert!(status.motor.connected);
        assert_eq!(status.ocr.len(), 1);
        assert!(!status.auto_centering);
    }

    #[test]
    fn raw_words_are_filtered_before_tracking() {
        let (rig, _handle, _sink) = rig();
        rig.observe_words(
            &[
                OcrWord {
                    text: "CRB8".into(),
                    rect: Rect::new(10, 10, 30, 12),
                    confidence: 88.0,
                },
                OcrWord {
                    text: "noise".into(),
                    rect: Rect::new(10, 100, 30, 12),
                    confidence: 10.0,
                },
            ],
            1920,
            1080,
        );
        let tracked = rig.tracker().snapshot();
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].text, "CRB");
    }

    #[test]
    fn realtime_passthrough_skips_line_framing() {
        let (rig, handle, _sink) = rig();
        rig.send_gcode("!").unwrap();
        rig.send_gcode("G0 X1").unwrap();
        assert_eq!(handle.realtime(), vec![protocol::FEED_HOLD]);
        assert_eq!(handle.commands(), vec!["G0 X1".to_string()]);
        assert!(rig.send_gcode("  ").is_err());
    }

    #[test]
    fn errors_are_kept_until_cleared() {
        let (rig, handle, _sink) = rig();
        handle.reject("G0 X9");
        assert!(rig.send_gcode("G0 X9").is_err());
        assert_eq!(rig.errors().len(), 1);
        rig.clear_errors();
        assert!(rig.errors().is_empty());
    }

    #[test]
    fn stop_centering_ends_a_direct_run() {
        let (rig, _handle, _sink) = rig();
        let running = rig
            .start_centering(&TargetRequest::Word("GHOST".into()))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        assert!(rig.status().auto_centering);
        rig.stop_centering().unwrap();
        assert_eq!(running.join().unwrap(), CenteringOutcome::Cancelled);
        assert!(!rig.status().auto_centering);
        assert!(matches!(rig.stop_centering(), Err(RigError::NotRunning("auto-center"))));
    }

    #[test]
    fn stop_centering_reaches_a_scenario_step() {
        let (rig, handle, sink) = rig();
        let started = Instant::now();
        let running = rig.start_scenario("seek").unwrap();
        assert!(wait_until(Duration::from_secs(1), || rig.status().auto_centering));
        rig.stop_centering().unwrap();
        assert!(wait_until(Duration::from_millis(300), || !rig.status().auto_centering));

        assert_eq!(running.join().unwrap(), ScenarioOutcome::Completed);
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(handle.pump_on());
        let warned = sink.events().into_iter().any(|event| {
            matches!(event, Event::ScenarioUpdate(progress)
                if progress.status == ScenarioStatus::Warning && progress.message.contains("stopped"))
        });
        assert!(warned);
    }

    #[test]
    fn emergency_stop_cancels_running_verification() {
        let (rig, _handle, _sink) = rig();
        let mut config = (*rig.config().snapshot()).clone();
        config.scenario_timing.verification_settle_ms = 10_000;
        config.verification.boxes.push(Roi {
            id: 1,
            name: "pad".into(),
            x: 0.1,
            y: 0.1,
            w: 0.2,
            h: 0.2,
            target_ratio: 50.0,
        });
        rig.apply_config(config);

        let started = Instant::now();
        let running = rig.run_verification().unwrap();
        thread::sleep(Duration::from_millis(50));
        rig.emergency_stop().unwrap();
        assert_eq!(running.join().unwrap(), VerificationOutcome::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
