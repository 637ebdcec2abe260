use crate::config::OcrFilterConfig;
use crate::geometry::Rect;
use crate::vision::detection::Detection;
use crate::vision::fuzzy;
use log::debug;

/// Word-level recognizer output before filtering.
#[derive(Debug, Clone, PartialEq)]
pub struct OcrWord {
    pub text: String,
    pub rect: Rect,
    pub confidence: f32,
}

/// Drops implausible words and snaps near-misses onto known labels.
pub fn prepare_detections(
    words: &[OcrWord],
    frame_width: i32,
    frame_height: i32,
    filter: &OcrFilterConfig,
    known_words: &[String],
) -> Vec<Detection> {
    let frame_area = f64::from(frame_width) * f64::from(frame_height);
    words
        .iter()
        .filter(|word| {
            let rect = word.rect;
            rect.x >= 0
                && rect.y >= 0
                && rect.right() <= i64::from(frame_width)
                && rect.bottom() <= i64::from(frame_height)
                && rect.w >= filter.min_box_side_px.max(1)
                && rect.h >= filter.min_box_side_px.max(1)
                && rect.area() as f64 <= frame_area * filter.max_area_fraction
        })
        .filter_map(|word| {
            let text = word.text.trim();
            if word.confidence <= filter.min_confidence
                || text.is_empty()
                || text.chars().count() < filter.min_word_length
            {
                return None;
            }
            let text = match fuzzy::closest_match(text, known_words, filter.fuzzy_cutoff) {
                Some(corrected) if corrected != text => {
                    debug!("ocr correction {:?} -> {:?}", text, corrected);
                    corrected
                }
                _ => text,
            };
            Some(Detection::new(text, word.rect))
        })
        .collect()
}
