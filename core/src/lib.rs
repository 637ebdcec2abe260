//! Motion, vision-tracking and sequencing core for a camera-guided
//! pick-and-place rig.
//!
//! [`rig::Rig`] owns one machine, one tracker and the workers built on
//! them; everything else is reachable through it or usable on its own.

pub mod cancel;
pub mod centering;
pub mod config;
pub mod geometry;
pub mod inspection;
pub mod machine;
pub mod prelude;
pub mod rig;
pub mod scenario;
pub mod telemetry;
pub mod vision;

pub use config::{ConfigStore, RigConfig};
pub use prelude::{DriverError, DriverResult, RigError, RigResult};
pub use rig::{Axis, Rig};
