use crate::config::TrackerConfig;
use crate::geometry::{Point, Rect};
use crate::vision::detection::{Detection, TrackedBox};
use crate::vision::target::TargetSelector;
use log::trace;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct TrackerState {
    // ascending id order, so the first best score is the oldest box
    boxes: Vec<TrackedBox>,
    next_id: u64,
    config: TrackerConfig,
}

/// Turns flickering per-frame detections into persistent tracked boxes.
///
/// `update` is the only writer; every reader takes the same lock for the
/// length of its scan.
pub struct StabilityTracker {
    state: Mutex<TrackerState>,
    epoch: Instant,
}

impl StabilityTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                boxes: Vec::new(),
                next_id: 1,
                config,
            }),
            epoch: Instant::now(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn configure(&self, config: TrackerConfig) {
        self.lock().config = config;
    }

    /// Feeds one frame of detections stamped with the current time.
    pub fn update(&self, detections: &[Detection]) {
        self.update_at(self.epoch.elapsed(), detections);
    }

    /// Feeds one frame stamped `now` (time since the tracker epoch).
    /// Timestamps must not go backwards.
    pub fn update_at(&self, now: Duration, detections: &[Detection]) {
        let mut state = self.lock();
        let iou_threshold = state.config.iou_threshold;
        let fallback_radius = state.config.fallback_radius_px;
        let growth_limit = state.config.growth_limit;
        let window = Duration::try_from_secs_f64(state.config.stability_window_secs.max(0.0))
            .unwrap_or(Duration::MAX);

        for detection in detections {
            let matched = best_overlap(&state.boxes, &detection.rect, iou_threshold)
                .or_else(|| nearest_same_text(&state.boxes, detection, fallback_radius));

            match matched {
                Some(index) => {
                    let tracked = &mut state.boxes[index];
                    let old_area = tracked.rect.area();
                    let new_area = detection.rect.area();
                    if old_area > 0 && new_area as f64 > old_area as f64 * growth_limit {
                        trace!("box {} growth rejected ({} -> {})", tracked.id, old_area, new_area);
                    } else {
                        tracked.rect = detection.rect;
                        tracked.text = detection.text.clone();
                    }
                    tracked.last_seen = now;
                }
                None => {
                    let id = state.next_id;
                    state.next_id += 1;
                    state.boxes.push(TrackedBox {
                        id,
                        rect: detection.rect,
                        text: detection.text.clone(),
                        last_seen: now,
                    });
                }
            }
        }

        state
            .boxes
            .retain(|tracked| now.saturating_sub(tracked.last_seen) <= window);
    }

    pub fn tracked(&self) -> Vec<TrackedBox> {
        self.lock().boxes.clone()
    }

    /// Current tracked boxes as detections.
    pub fn snapshot(&self) -> Vec<Detection> {
        self.lock().boxes.iter().map(TrackedBox::detection).collect()
    }

    /// Best match for `selector`: the matching box nearest `origin`.
    pub fn find_target(&self, selector: &TargetSelector, origin: Point) -> Option<Detection> {
        let state = self.lock();
        state
            .boxes
            .iter()
            .filter(|tracked| selector.matches(&tracked.text))
            .map(TrackedBox::detection)
            .min_by(|a, b| {
                a.center
                    .distance(&origin)
                    .total_cmp(&b.center.distance(&origin))
            })
    }
}

fn best_overlap(boxes: &[TrackedBox], rect: &Rect, threshold: f64) -> Option<usize> {
    let mut best = None;
    let mut best_score = threshold;
    for (index, tracked) in boxes.iter().enumerate() {
        let score = rect.iou(&tracked.rect);
        if score > best_score {
            best_score = score;
            best = Some(index);
        }
    }
    best
}

fn nearest_same_text(boxes: &[TrackedBox], detection: &Detection, radius: f64) -> Option<usize> {
    let (nx, ny) = half_center(&detection.rect);
    boxes.iter().position(|tracked| {
        if tracked.text != detection.text {
            return false;
        }
        let (ox, oy) = half_center(&tracked.rect);
        ((ox - nx).powi(2) + (oy - ny).powi(2)).sqrt() < radius
    })
}

fn half_center(rect: &Rect) -> (f64, f64) {
    (
        f64::from(rect.x) + f64::from(rect.w) / 2.0,
        f64::from(rect.y) + f64::from(rect.h) / 2.0,
    )
}
