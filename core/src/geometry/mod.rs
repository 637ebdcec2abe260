pub mod rect;
pub mod transform;

pub use rect::{Point, Rect};
pub use transform::AxisMapping;
