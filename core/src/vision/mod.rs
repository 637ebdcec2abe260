pub mod detection;
pub mod fuzzy;
pub mod ocr;
pub mod target;
pub mod tracker;
pub mod verify;

pub use detection::{Detection, TrackedBox};
pub use ocr::{prepare_detections, OcrWord};
pub use target::{TargetRequest, TargetSelector};
pub use tracker::StabilityTracker;
pub use verify::{evaluate, GrayFrame, Roi, RoiResult, VerificationSpec};
