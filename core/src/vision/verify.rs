use ndarray::{s, Array2};
use serde::{Deserialize, Serialize};

/// Grayscale frame, rows by columns.
pub type GrayFrame = Array2<u8>;

/// Region of interest in normalized frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Roi {
    pub id: u64,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
    /// Required black-pixel percentage.
    pub target_ratio: f64,
}

impl Default for Roi {
    fn default() -> Self {
        Self {
            id: 0,
            name: "Unknown".into(),
            x: 0.0,
            y: 0.0,
            w: 0.1,
            h: 0.1,
            target_ratio: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationSpec {
    pub base_name: String,
    pub boxes: Vec<Roi>,
    pub threshold: u8,
}

impl Default for VerificationSpec {
    fn default() -> Self {
        Self {
            base_name: String::new(),
            boxes: Vec::new(),
            threshold: 127,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoiResult {
    pub id: u64,
    pub name: String,
    /// Black-pixel percentage, two decimals.
    pub ratio: f64,
    pub success: bool,
    pub target: f64,
}

/// Fill ratio of every ROI after binarizing at `threshold`
/// (pixel > threshold is white).
pub fn evaluate(frame: &GrayFrame, boxes: &[Roi], threshold: u8) -> Vec<RoiResult> {
    boxes
        .iter()
        .map(|roi| {
            let ratio = black_percentage(frame, roi, threshold)
                .map(|ratio| (ratio * 100.0).round() / 100.0);
            RoiResult {
                id: roi.id,
                name: roi.name.clone(),
                ratio: ratio.unwrap_or(0.0),
                success: ratio.map_or(false, |ratio| ratio >= roi.target_ratio),
                target: roi.target_ratio,
            }
        })
        .collect()
}

fn black_percentage(frame: &GrayFrame, roi: &Roi, threshold: u8) -> Option<f64> {
    let (rows, cols) = frame.dim();
    let (height, width) = (rows as f64, cols as f64);

    let bx = (roi.x * width) as i64;
    let by = (roi.y * height) as i64;
    let bw = (roi.w * width) as i64;
    let bh = (roi.h * height) as i64;

    let x1 = bx.max(0) as usize;
    let y1 = by.max(0) as usize;
    let x2 = (bx + bw).clamp(0, cols as i64) as usize;
    let y2 = (by + bh).clamp(0, rows as i64) as usize;
    if x2 <= x1 || y2 <= y1 {
        return None;
    }

    let region = frame.slice(s![y1..y2, x1..x2]);
    let black = region.iter().filter(|&&pixel| pixel <= threshold).count();
    Some(black as f64 / region.len() as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roi(x: f64, y: f64, w: f64, h: f64, target_ratio: f64) -> Roi {
        Roi {
            x,
            y,
            w,
            h,
            target_ratio,
            ..Roi::default()
        }
    }

    /// Left half black, right half white.
    fn split_frame() -> GrayFrame {
        Array2::from_shape_fn((10, 20), |(_, col)| if col < 10 { 20 } else { 230 })
    }

    #[test]
    fn ratios_follow_pixel_fill() {
        let frame = split_frame();
        let results = evaluate(
            &frame,
            &[
                roi(0.0, 0.0, 0.5, 1.0, 90.0),
                roi(0.5, 0.0, 0.5, 1.0, 10.0),
                roi(0.25, 0.0, 0.5, 1.0, 50.0),
            ],
            127,
        );
        assert_eq!(results[0].ratio, 100.0);
        assert!(results[0].success);
        assert_eq!(results[1].ratio, 0.0);
        assert!(!results[1].success);
        assert_eq!(results[2].ratio, 50.0);
        assert!(results[2].success);
    }

    #[test]
    fn rois_are_clamped_and_empty_ones_fail() {
        let frame = split_frame();
        let results = evaluate(
            &frame,
            &[roi(-0.5, 0.0, 1.0, 1.0, 100.0), roi(1.2, 0.0, 0.3, 0.3, 0.0)],
            127,
        );
        assert_eq!(results[0].ratio, 100.0);
        assert_eq!(results[1].ratio, 0.0);
        assert!(!results[1].success);
    }

    #[test]
    fn threshold_is_exclusive_for_white() {
        let frame = Array2::from_elem((4, 4), 127u8);
        let results = evaluate(&frame, &[roi(0.0, 0.0, 1.0, 1.0, 100.0)], 127);
        assert!(results[0].success);
        let results = evaluate(&frame, &[roi(0.0, 0.0, 1.0, 1.0, 1.0)], 126);
        assert!(!results[0].success);
    }
}
