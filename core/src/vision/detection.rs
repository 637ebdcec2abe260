use crate::geometry::{Point, Rect};
use serde::Serialize;
use std::time::Duration;

/// One recognized text box from a single frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub text: String,
    pub rect: Rect,
    pub center: Point,
}

impl Detection {
    pub fn new(text: impl Into<String>, rect: Rect) -> Self {
        Self {
            text: text.into(),
            rect,
            center: rect.center(),
        }
    }
}

/// Identity-preserving box owned by the stability tracker.
///
/// `last_seen` is measured from the tracker's epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedBox {
    pub id: u64,
    pub rect: Rect,
    pub text: String,
    pub last_seen: Duration,
}

impl TrackedBox {
    pub fn detection(&self) -> Detection {
        Detection::new(self.text.clone(), self.rect)
    }
}
