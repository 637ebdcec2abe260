use anyhow::{anyhow, Context};
use pnpcore::centering::CenteringOutcome;
use pnpcore::inspection::VerificationOutcome;
use pnpcore::scenario::ScenarioOutcome;
use pnpcore::vision::TargetRequest;
use pnpcore::Rig;
use std::sync::Arc;
use std::thread::JoinHandle;

/// One station request, run to completion.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Home,
    Gcode(String),
    Center(TargetRequest),
    Scenario(String),
    MasterScenario(String),
    Verify,
}

fn join<T>(worker: JoinHandle<T>, what: &str) -> anyhow::Result<T> {
    worker
        .join()
        .map_err(|_| anyhow!("{} worker panicked", what))
}

#[derive(Clone)]
pub struct Runner {
    rig: Arc<Rig>,
}

impl Runner {
    pub fn new(rig: Arc<Rig>) -> Self {
        Self { rig }
    }

    /// Runs `action` and returns a one-line summary.
    pub fn execute(&self, action: &Action) -> anyhow::Result<String> {
        log::info!("station action: {:?}", action);
        match action {
            Action::Home => {
                self.rig.home().context("homing")?;
                Ok("homed".into())
            }
            Action::Gcode(command) => {
                self.rig
                    .send_gcode(command)
                    .with_context(|| format!("sending `{}`", command))?;
                Ok(format!("sent `{}`", command))
            }
            Action::Center(request) => {
                let worker = self
                    .rig
                    .start_centering(request)
                    .context("starting auto-center")?;
                match join(worker, "auto-center")? {
                    CenteringOutcome::Centered {
                        final_error_px: Some(error),
                    } => Ok(format!("centered, final error {:.1}px", error)),
                    CenteringOutcome::Centered { final_error_px: None } => {
                        Ok("centered, verification unavailable".into())
                    }
                    other => Err(anyhow!("auto-center ended with {:?}", other)),
                }
            }
            Action::Scenario(name) => {
                let worker = self
                    .rig
                    .start_scenario(name)
                    .with_context(|| format!("starting scenario `{}`", name))?;
                scenario_summary(name, join(worker, "scenario")?)
            }
            Action::MasterScenario(name) => {
                let worker = self
                    .rig
                    .start_master_scenario(name)
                    .with_context(|| format!("starting master scenario `{}`", name))?;
                scenario_summary(name, join(worker, "scenario")?)
            }
            Action::Verify => {
                let worker = self
                    .rig
                    .run_verification()
                    .context("starting verification")?;
                match join(worker, "verification")? {
                    VerificationOutcome::Completed(results) => {
                        let passed = results.iter().filter(|result| result.success).count();
                        Ok(format!("verification {}/{} boxes passed", passed, results.len()))
                    }
                    VerificationOutcome::Cancelled => Err(anyhow!("verification cancelled")),
                    VerificationOutcome::Failed(message) => {
                        Err(anyhow!("verification failed: {}", message))
                    }
                }
            }
        }
    }
}

fn scenario_summary(name: &str, outcome: ScenarioOutcome) -> anyhow::Result<String> {
    match outcome {
        ScenarioOutcome::Completed => Ok(format!("scenario `{}` complete", name)),
        ScenarioOutcome::Stopped => Ok(format!("scenario `{}` stopped", name)),
        ScenarioOutcome::Failed(message) => Err(anyhow!("scenario `{}` failed: {}", name, message)),
    }
}
