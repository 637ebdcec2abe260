//! Closed-loop centering of a recognized label under the camera.

pub mod controller;
pub mod patterns;

use crate::geometry::Point;
use crate::vision::{Detection, StabilityTracker, TargetSelector};
use serde::Serialize;

pub use controller::{CenteringController, CenteringOutcome, CenteringSettings};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CenteringPhase {
    Acquire,
    Coarse,
    Transition,
    Fine,
    Check,
    Done,
}

impl CenteringPhase {
    pub fn label(&self) -> &'static str {
        match self {
            CenteringPhase::Acquire => "acquire",
            CenteringPhase::Coarse => "coarse",
            CenteringPhase::Transition => "transition",
            CenteringPhase::Fine => "fine",
            CenteringPhase::Check => "check",
            CenteringPhase::Done => "done",
        }
    }
}

/// Where the centering loop reads target positions from.
pub trait TargetSource: Send + Sync {
    fn locate(&self, selector: &TargetSelector, origin: Point) -> Option<Detection>;
}

impl TargetSource for StabilityTracker {
    fn locate(&self, selector: &TargetSelector, origin: Point) -> Option<Detection> {
        self.find_target(selector, origin)
    }
}
