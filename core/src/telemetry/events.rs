use crate::centering::CenteringPhase;
use crate::machine::MachineState;
use crate::vision::Detection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Status tag of a centering progress notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStatus {
    Started,
    Moving,
    Error,
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CenteringProgress {
    pub phase: CenteringPhase,
    pub status: ProgressStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioStatus {
    Started,
    Running,
    Warning,
    Stopped,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScenarioProgress {
    pub status: ScenarioStatus,
    pub message: String,
    pub step_index: Option<usize>,
    pub total_steps: usize,
    pub step_type: Option<String>,
    pub scenario_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Running,
    Info,
    Warning,
    BoxProgress,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationProgress {
    pub status: VerificationStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEntry {
    pub id: u64,
    pub message: String,
    pub level: Severity,
    pub timestamp: f64,
}

/// Periodic view of the rig for telemetry consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub motor: MachineState,
    pub ocr: Vec<Detection>,
    pub auto_centering: bool,
    pub auto_center_status: String,
    pub scenario_running: bool,
}

/// Structured notification emitted by the core; transports pick the encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum Event {
    MotorUpdate(MachineState),
    AutoCenterUpdate(CenteringProgress),
    ScenarioUpdate(ScenarioProgress),
    VerificationUpdate(VerificationProgress),
    ErrorToast(ErrorEntry),
    StatusUpdate(StatusSnapshot),
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::MotorUpdate(_) => "motor_update",
            Event::AutoCenterUpdate(_) => "auto_center_update",
            Event::ScenarioUpdate(_) => "scenario_update",
            Event::VerificationUpdate(_) => "verification_update",
            Event::ErrorToast(_) => "error_toast",
            Event::StatusUpdate(_) => "status_update",
        }
    }

    pub fn payload(&self) -> Value {
        let encoded = match self {
            Event::MotorUpdate(state) => serde_json::to_value(state),
            Event::AutoCenterUpdate(progress) => serde_json::to_value(progress),
            Event::ScenarioUpdate(progress) => serde_json::to_value(progress),
            Event::VerificationUpdate(progress) => serde_json::to_value(progress),
            Event::ErrorToast(entry) => serde_json::to_value(entry),
            Event::StatusUpdate(snapshot) => serde_json::to_value(snapshot),
        };
        encoded.unwrap_or(Value::Null)
    }
}

/// Consumer of core events (websocket bridge, log, test recorder, ...).
pub trait EventSink: Send + Sync {
    fn emit(&self, event: Event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn centering_payload_uses_lowercase_tags() {
        let event = Event::AutoCenterUpdate(CenteringProgress {
            phase: CenteringPhase::Coarse,
            status: ProgressStatus::Moving,
            message: "iteration 1".into(),
        });
        assert_eq!(event.name(), "auto_center_update");
        let payload = event.payload();
        assert_eq!(payload["phase"], "coarse");
        assert_eq!(payload["status"], "moving");
    }

    #[test]
    fn tagged_encoding_wraps_payload() {
        let event = Event::ErrorToast(ErrorEntry {
            id: 3,
            message: "timeout".into(),
            level: Severity::Error,
            timestamp: 1.0,
        });
        let encoded = serde_json::to_value(&event).unwrap();
        assert_eq!(encoded["event"], "error_toast");
        assert_eq!(encoded["payload"]["level"], "ERROR");
    }
}
