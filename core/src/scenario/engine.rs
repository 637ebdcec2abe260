use crate::cancel::{ActiveRun, CancelToken, RunFlag, RunGuard};
use crate::centering::{CenteringController, CenteringOutcome, CenteringSettings};
use crate::config::{ConfigStore, RigConfig};
use crate::inspection::{Inspector, VerificationOutcome};
use crate::machine::MachineDriver;
use crate::prelude::{RigError, RigResult};
use crate::scenario::model::{Scenario, Step};
use crate::telemetry::{Event, EventSink, ScenarioProgress, ScenarioStatus};
use crate::vision::TargetSelector;
use log::{error, info, warn};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const HOME_SETTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub enum ScenarioOutcome {
    Completed,
    Stopped,
    Failed(String),
}

enum Flow {
    Next,
    Stop,
}

/// Runs one scenario at a time on its own worker thread.
pub struct ScenarioEngine {
    driver: Arc<MachineDriver>,
    centering: Arc<CenteringController>,
    inspector: Arc<Inspector>,
    config: Arc<ConfigStore>,
    sink: Arc<dyn EventSink>,
    active: RunFlag,
    runs: ActiveRun,
}

impl ScenarioEngine {
    pub fn new(
        driver: Arc<MachineDriver>,
        centering: Arc<CenteringController>,
        inspector: Arc<Inspector>,
        config: Arc<ConfigStore>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            driver,
            centering,
            inspector,
            config,
            sink,
            active: RunFlag::new(),
            runs: ActiveRun::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.is_active()
    }

    /// Claims the run flag synchronously and executes on a new thread.
    pub fn start(self: &Arc<Self>, scenario: Scenario) -> RigResult<JoinHandle<ScenarioOutcome>> {
        let guard = self.begin()?;
        let cancel = self.runs.arm();
        let engine = Arc::clone(self);
        Ok(thread::spawn(move || engine.execute(guard, &scenario, &cancel)))
    }

    /// Blocking variant of [`ScenarioEngine::start`].
    pub fn run(&self, scenario: &Scenario) -> RigResult<ScenarioOutcome> {
        let guard = self.begin()?;
        let cancel = self.runs.arm();
        Ok(self.execute(guard, scenario, &cancel))
    }

    /// Raises the stop flag of the running scenario, if any.
    pub fn stop(&self) -> bool {
        self.runs.stop()
    }

    fn begin(&self) -> RigResult<RunGuard> {
        self.active
            .try_acquire()
            .ok_or(RigError::AlreadyRunning("scenario"))
    }

    fn emit(&self, scenario: &Scenario, status: ScenarioStatus, message: &str, step: Option<usize>) {
        self.sink.emit(Event::ScenarioUpdate(ScenarioProgress {
            status,
            message: message.to_string(),
            step_index: step,
            total_steps: scenario.steps.len(),
            step_type: step
                .and_then(|index| scenario.steps.get(index))
                .map(|step| step.kind().to_string()),
            scenario_name: scenario.name.clone(),
        }));
    }

    fn execute(&self, _guard: RunGuard, scenario: &Scenario, cancel: &CancelToken) -> ScenarioOutcome {
        let total = scenario.steps.len();
        info!("scenario '{}' started ({} steps)", scenario.name, total);
        self.emit(
            scenario,
            ScenarioStatus::Started,
            &format!("scenario '{}' started ({} steps)", scenario.name, total),
            None,
        );

        let outcome = self.run_steps(scenario, cancel);
        match &outcome {
            ScenarioOutcome::Completed => {
                info!("scenario '{}' complete", scenario.name);
                self.emit(
                    scenario,
                    ScenarioStatus::Done,
                    &format!("scenario '{}' complete", scenario.name),
                    None,
                );
            }
            ScenarioOutcome::Stopped => info!("scenario '{}' stopped", scenario.name),
            ScenarioOutcome::Failed(message) => {
                error!("scenario '{}' failed: {}", scenario.name, message);
                self.emit(
                    scenario,
                    ScenarioStatus::Error,
                    &format!("scenario error: {}", message),
                    None,
                );
            }
        }
        self.runs.clear();
        outcome
    }

    fn run_steps(&self, scenario: &Scenario, cancel: &CancelToken) -> ScenarioOutcome {
        let total = scenario.steps.len();
        for (index, step) in scenario.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                self.stopped(scenario, &format!("stopped at step {}/{}", index + 1, total));
                return ScenarioOutcome::Stopped;
            }
            self.emit(
                scenario,
                ScenarioStatus::Running,
                &format!("step {}/{}: {}", index + 1, total, step.describe()),
                Some(index),
            );

            let config = self.config.snapshot();
            match self.run_step(scenario, index, step, &config, cancel) {
                Ok(Flow::Next) => {}
                Ok(Flow::Stop) => {
                    self.stopped(scenario, &format!("stopped during step {}/{}", index + 1, total));
                    return ScenarioOutcome::Stopped;
                }
                Err(message) => return ScenarioOutcome::Failed(message),
            }

            if cancel.sleep(config.scenario_timing.step_pause()) {
                self.stopped(scenario, &format!("stopped after step {}/{}", index + 1, total));
                return ScenarioOutcome::Stopped;
            }
        }
        ScenarioOutcome::Completed
    }

    fn stopped(&self, scenario: &Scenario, message: &str) {
        self.emit(scenario, ScenarioStatus::Stopped, message, None);
    }

    fn warn(&self, scenario: &Scenario, index: usize, message: &str) {
        warn!("scenario '{}': {}", scenario.name, message);
        self.emit(scenario, ScenarioStatus::Warning, message, Some(index));
    }

    fn run_step(
        &self,
        scenario: &Scenario,
        index: usize,
        step: &Step,
        config: &RigConfig,
        cancel: &CancelToken,
    ) -> Result<Flow, String> {
        let failed = |err: crate::prelude::DriverError| format!("{} failed: {}", step.describe(), err);
        match step {
            Step::GotoBase { base_name } => match config.base(base_name) {
                Some(base) => {
                    self.driver
                        .goto_z_safe(base.x, base.y, base.z)
                        .map_err(failed)?;
                }
                None => self.warn(scenario, index, &format!("base '{}' not found", base_name)),
            },
            Step::AutoCenter { word } => {
                let word = word.trim();
                if word.is_empty() {
                    self.warn(scenario, index, "auto-center word is empty");
                    return Ok(Flow::Next);
                }
                let selector = TargetSelector::Word(word.to_string());
                let settings = CenteringSettings::from_config(config);
                match self.centering.run(&selector, &settings, cancel) {
                    Ok(CenteringOutcome::Centered { .. }) => {}
                    Ok(CenteringOutcome::Cancelled) if cancel.is_cancelled() => return Ok(Flow::Stop),
                    Ok(CenteringOutcome::Cancelled) => {
                        self.warn(scenario, index, &format!("centering on '{}' stopped", word))
                    }
                    Ok(CenteringOutcome::Failed(message)) => return Err(message),
                    Ok(other) => self.warn(
                        scenario,
                        index,
                        &format!("centering on '{}' ended without success ({:?})", word, other),
                    ),
                    Err(err) => self.warn(scenario, index, &format!("auto-center skipped: {}", err)),
                }
            }
            Step::PumpOn => self.driver.pump(true).map_err(failed)?,
            Step::PumpOff => self.driver.pump(false).map_err(failed)?,
            Step::Delay { seconds } => {
                let wait = Duration::try_from_secs_f64(*seconds).unwrap_or(Duration::ZERO);
                if cancel.sleep(wait) {
                    return Ok(Flow::Stop);
                }
            }
            Step::Home => {
                self.driver.home().map_err(failed)?;
                if cancel.sleep(HOME_SETTLE) {
                    return Ok(Flow::Stop);
                }
            }
            Step::MoveZ { z } => self
                .driver
                .move_absolute(None, None, Some(*z), None)
                .map_err(failed)?,
            Step::Verify => {
                if self.inspector.is_running() {
                    self.warn(scenario, index, "verification already running, skipped");
                    return Ok(Flow::Next);
                }
                match self.inspector.run(config, cancel) {
                    Ok(VerificationOutcome::Cancelled) if cancel.is_cancelled() => return Ok(Flow::Stop),
                    Ok(VerificationOutcome::Cancelled) => self.warn(scenario, index, "verification stopped"),
                    Ok(VerificationOutcome::Failed(message)) => {
                        self.warn(scenario, index, &format!("verification failed: {}", message))
                    }
                    Ok(VerificationOutcome::Completed(_)) => {}
                    Err(err) => self.warn(scenario, index, &format!("verification skipped: {}", err)),
                }
            }
            Step::Unknown => self.warn(scenario, index, "unknown step type, skipped"),
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MotionConfig, SavedPosition, ScenarioTiming};
    use crate::inspection::FrameSlot;
    use crate::machine::{SimulatedController, SimulatedHandle};
    use crate::telemetry::{ErrorLog, MemorySink, Reporter};
    use crate::vision::StabilityTracker;
    use std::time::Instant;

    struct Bench {
        engine: Arc<ScenarioEngine>,
        driver: Arc<MachineDriver>,
        handle: SimulatedHandle,
        sink: Arc<MemorySink>,
    }

    fn bench() -> Bench {
        let sink = Arc::new(MemorySink::new());
        let reporter = Reporter::new(Arc::new(ErrorLog::new()), sink.clone());
        let motion = MotionConfig {
            command_timeout_ms: 200,
            pump_off_repeat_delay_ms: 0,
            ..MotionConfig::default()
        };
        let driver = Arc::new(MachineDriver::new(motion, reporter));
        let (controller, handle) = SimulatedController::new();
        driver.attach(Box::new(controller), "sim");
        handle.clear_log();

        let config = RigConfig {
            scenario_timing: ScenarioTiming {
                step_pause_ms: 0,
                verification_settle_ms: 0,
            },
            bases: vec![
                SavedPosition {
                    name: "low".into(),
                    x: 10.0,
                    y: 20.0,
                    z: -150.0,
                },
                SavedPosition {
                    name: "high".into(),
                    x: 10.0,
                    y: 20.0,
                    z: -50.0,
                },
            ],
            ..RigConfig::default()
        };
        let tracker = Arc::new(StabilityTracker::new(config.tracker.clone()));
        let centering = Arc::new(CenteringController::new(driver.clone(), tracker, sink.clone()));
        let inspector = Arc::new(Inspector::new(
            driver.clone(),
            Arc::new(FrameSlot::new()),
            sink.clone(),
        ));
        let engine = Arc::new(ScenarioEngine::new(
            driver.clone(),
            centering,
            inspector,
            Arc::new(ConfigStore::new(config)),
            sink.clone(),
        ));
        Bench {
            engine,
            driver,
            handle,
            sink,
        }
    }

    fn scenario(steps: Vec<Step>) -> Scenario {
        Scenario {
            name: "test".into(),
            steps,
        }
    }

    fn statuses(sink: &MemorySink) -> Vec<ScenarioStatus> {
        sink.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::ScenarioUpdate(progress) => Some(progress.status),
                _ => None,
            })
            .collect()
    }

    /// Index of the first command starting with `prefix`.
    fn position_of(commands: &[String], prefix: &str) -> usize {
        commands
            .iter()
            .position(|command| command.starts_with(prefix))
            .unwrap_or_else(|| panic!("no {prefix:?} in {commands:?}"))
    }

    fn start_at_z(bench: &Bench, z: f64) {
        bench.driver.move_absolute(None, None, Some(z), None).unwrap();
        bench.handle.clear_log();
    }

    #[test]
    fn stop_interrupts_a_long_delay() {
        let bench = bench();
        let running = bench
            .engine
            .start(scenario(vec![Step::Delay { seconds: 10.0 }, Step::PumpOn]))
            .unwrap();
        thread::sleep(Duration::from_millis(100));
        let stopped_at = Instant::now();
        assert!(bench.engine.stop());
        let outcome = running.join().unwrap();
        assert!(stopped_at.elapsed() <= Duration::from_millis(500));
        assert_eq!(outcome, ScenarioOutcome::Stopped);
        assert!(!bench.handle.pump_on());
        assert_eq!(statuses(&bench.sink).last(), Some(&ScenarioStatus::Stopped));
        assert!(!bench.engine.is_running());
    }

    #[test]
    fn descending_goto_moves_xy_first() {
        let bench = bench();
        start_at_z(&bench, -100.0);
        let outcome = bench
            .engine
            .run(&scenario(vec![Step::GotoBase {
                base_name: "low".into(),
            }]))
            .unwrap();
        assert_eq!(outcome, ScenarioOutcome::Completed);
        let commands = bench.handle.commands();
        assert!(position_of(&commands, "G1 F1000 X10.00") < position_of(&commands, "G1 F1000 Z-150.00"));
        assert_eq!(bench.handle.position().z, -150.0);
    }

    #[test]
    fn ascending_goto_moves_z_first() {
        let bench = bench();
        start_at_z(&bench, -100.0);
        bench
            .engine
            .run(&scenario(vec![Step::GotoBase {
                base_name: "high".into(),
            }]))
            .unwrap();
        let commands = bench.handle.commands();
        assert!(position_of(&commands, "G1 F1000 Z-50.00") < position_of(&commands, "G1 F1000 X10.00"));
    }

    #[test]
    fn second_start_is_rejected_while_running() {
        let bench = bench();
        let steps = vec![Step::PumpOn, Step::Delay { seconds: 1.0 }, Step::PumpOff];
        let first = bench.engine.start(scenario(steps.clone())).unwrap();
        let second = bench.engine.start(scenario(steps));
        assert!(matches!(second, Err(RigError::AlreadyRunning("scenario"))));
        assert_eq!(first.join().unwrap(), ScenarioOutcome::Completed);

        let commands = bench.handle.commands();
        assert_eq!(commands.iter().filter(|c| c.as_str() == "M8").count(), 1);
        assert!(!bench.handle.pump_on());
        assert!(!bench.engine.is_running());
    }

    #[test]
    fn missing_base_and_unknown_steps_only_warn() {
        let bench = bench();
        let outcome = bench
            .engine
            .run(&scenario(vec![
                Step::GotoBase {
                    base_name: "ghost".into(),
                },
                Step::Unknown,
                Step::PumpOn,
            ]))
            .unwrap();
        assert_eq!(outcome, ScenarioOutcome::Completed);
        let statuses = statuses(&bench.sink);
        assert_eq!(
            statuses
                .iter()
                .filter(|status| **status == ScenarioStatus::Warning)
                .count(),
            2
        );
        assert_eq!(statuses.last(), Some(&ScenarioStatus::Done));
        assert!(bench.handle.pump_on());
    }

    #[test]
    fn rejected_command_fails_the_scenario() {
        let bench = bench();
        bench.handle.reject("M8");
        let outcome = bench
            .engine
            .run(&scenario(vec![Step::PumpOn, Step::Home]))
            .unwrap();
        assert!(matches!(outcome, ScenarioOutcome::Failed(_)));
        assert!(!bench.handle.commands().iter().any(|c| c == "$H"));
        assert_eq!(statuses(&bench.sink).last(), Some(&ScenarioStatus::Error));
    }

    #[test]
    fn progress_carries_step_metadata() {
        let bench = bench();
        bench
            .engine
            .run(&scenario(vec![Step::MoveZ { z: -20.0 }]))
            .unwrap();
        let progress: Vec<ScenarioProgress> = bench
            .sink
            .events()
            .into_iter()
            .filter_map(|event| match event {
                Event::ScenarioUpdate(progress) => Some(progress),
                _ => None,
            })
            .collect();
        let running = progress
            .iter()
            .find(|p| p.status == ScenarioStatus::Running)
            .unwrap();
        assert_eq!(running.step_index, Some(0));
        assert_eq!(running.step_type.as_deref(), Some("move_z"));
        assert_eq!(running.total_steps, 1);
        assert_eq!(running.scenario_name, "test");
        assert_eq!(bench.handle.position().z, -20.0);
    }
}
