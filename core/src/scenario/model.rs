use log::warn;
use serde::{Deserialize, Serialize};

/// One scenario instruction, tagged by `type` in stored definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    GotoBase {
        #[serde(default)]
        base_name: String,
    },
    AutoCenter {
        #[serde(default)]
        word: String,
    },
    PumpOn,
    PumpOff,
    Delay {
        #[serde(default = "default_delay")]
        seconds: f64,
    },
    Home,
    MoveZ {
        #[serde(default)]
        z: f64,
    },
    Verify,
    /// Any tag this build does not know; reported and skipped at run time.
    #[serde(other)]
    Unknown,
}

fn default_delay() -> f64 {
    1.0
}

impl Step {
    pub fn kind(&self) -> &'static str {
        match self {
            Step::GotoBase { .. } => "goto_base",
            Step::AutoCenter { .. } => "auto_center",
            Step::PumpOn => "pump_on",
            Step::PumpOff => "pump_off",
            Step::Delay { .. } => "delay",
            Step::Home => "home",
            Step::MoveZ { .. } => "move_z",
            Step::Verify => "verify",
            Step::Unknown => "unknown",
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Step::GotoBase { base_name } => format!("go to base '{}'", base_name),
            Step::AutoCenter { word } => format!("center on '{}'", word),
            Step::PumpOn => "pump on".into(),
            Step::PumpOff => "pump off".into(),
            Step::Delay { seconds } => format!("wait {}s", seconds),
            Step::Home => "home".into(),
            Step::MoveZ { z } => format!("move Z to {}mm", z),
            Step::Verify => "verify".into(),
            Step::Unknown => "unknown step".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub name: String,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Ordered composition of scenarios referenced by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterScenario {
    pub name: String,
    #[serde(default)]
    pub sequence: Vec<String>,
}

impl MasterScenario {
    /// Flattens the referenced scenarios into one virtual scenario.
    /// Names that do not resolve are logged and skipped.
    pub fn expand(&self, scenarios: &[Scenario]) -> Scenario {
        let mut steps = Vec::new();
        for name in &self.sequence {
            match scenarios.iter().find(|scenario| &scenario.name == name) {
                Some(scenario) => steps.extend(scenario.steps.iter().cloned()),
                None => warn!(
                    "master scenario '{}': sub-scenario '{}' not found, skipped",
                    self.name, name
                ),
            }
        }
        Scenario {
            name: format!("[M] {}", self.name),
            steps,
        }
    }
}
