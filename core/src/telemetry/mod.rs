pub mod broadcast;
pub mod errors;
pub mod events;
pub mod log;

pub use broadcast::spawn_status_broadcaster;
pub use errors::{ErrorLog, Reporter};
pub use events::{
    CenteringProgress, ErrorEntry, Event, EventSink, ProgressStatus, ScenarioProgress,
    ScenarioStatus, Severity, StatusSnapshot, VerificationProgress, VerificationStatus,
};
pub use log::{LogSink, MemorySink};
