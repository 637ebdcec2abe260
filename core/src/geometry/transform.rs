use serde::{Deserialize, Serialize};

/// Screen-to-motor axis mapping derived from how the camera is mounted.
///
/// All displacement sign and axis decisions go through this type; nothing
/// else in the crate flips or swaps axes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisMapping {
    pub swap_axes: bool,
    #[serde(alias = "negate_screen_x")]
    pub negate_x: bool,
    #[serde(alias = "negate_screen_y")]
    pub negate_y: bool,
}

impl AxisMapping {
    pub const IDENTITY: AxisMapping = AxisMapping {
        swap_axes: false,
        negate_x: false,
        negate_y: false,
    };

    /// Pure sign inversion, used for the driver's legacy per-axis inversion.
    pub fn inversion(negate_x: bool, negate_y: bool) -> Self {
        Self {
            swap_axes: false,
            negate_x,
            negate_y,
        }
    }

    /// Negate first, then swap.
    pub fn screen_to_motor(&self, dx: f64, dy: f64) -> (f64, f64) {
        let sx = if self.negate_x { -dx } else { dx };
        let sy = if self.negate_y { -dy } else { dy };
        if self.swap_axes {
            (sy, sx)
        } else {
            (sx, sy)
        }
    }

    /// Exact inverse of [`AxisMapping::screen_to_motor`].
    pub fn motor_to_screen(&self, mdx: f64, mdy: f64) -> (f64, f64) {
        let (sx, sy) = if self.swap_axes { (mdy, mdx) } else { (mdx, mdy) };
        let dx = if self.negate_x { -sx } else { sx };
        let dy = if self.negate_y { -sy } else { sy };
        (dx, dy)
    }
}
