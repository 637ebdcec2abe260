use ndarray::{s, Array2};
use pnpcore::cancel::CancelToken;
use pnpcore::geometry::{AxisMapping, Point, Rect};
use pnpcore::machine::{Position, SimulatedHandle};
use pnpcore::vision::{Detection, GrayFrame};
use pnpcore::{Rig, RigConfig};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A printed label fixed in machine space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneLabel {
    pub text: String,
    /// Machine position that puts the label on the reference point.
    pub x: f64,
    pub y: f64,
    #[serde(default = "default_label_width")]
    pub width_px: i32,
    #[serde(default = "default_label_height")]
    pub height_px: i32,
}

fn default_label_width() -> i32 {
    80
}

fn default_label_height() -> i32 {
    30
}

/// Synthetic camera used by offline runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    pub labels: Vec<SceneLabel>,
    pub fps: f64,
    pub jitter_px: i32,
    /// Probability that a frame yields no detections at all.
    pub drop_rate: f64,
    pub seed: u64,
    /// Rendered frames per detection frame; rendering is the slow part.
    pub render_every: u32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            labels: vec![
                SceneLabel {
                    text: "TEST".into(),
                    x: 4.0,
                    y: -2.0,
                    width_px: default_label_width(),
                    height_px: default_label_height(),
                },
                SceneLabel {
                    text: "CRB".into(),
                    x: -6.0,
                    y: 3.0,
                    width_px: default_label_width(),
                    height_px: default_label_height(),
                },
            ],
            fps: 20.0,
            jitter_px: 1,
            drop_rate: 0.05,
            seed: 7,
            render_every: 10,
        }
    }
}

/// Projects machine-space labels into camera pixels for a given head
/// position, using the same calibration the rig centers with.
pub struct Scene {
    config: SceneConfig,
    calibration: AxisMapping,
    inversion: AxisMapping,
    mm_per_px: (f64, f64),
    reference: Point,
    frame: (i32, i32),
    rng: StdRng,
}

impl Scene {
    pub fn new(config: SceneConfig, rig: &RigConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            calibration: rig.calibration.axes(),
            inversion: AxisMapping::inversion(rig.motion.invert_x, rig.motion.invert_y),
            mm_per_px: (rig.calibration.pixel_to_mm_x, rig.calibration.pixel_to_mm_y),
            reference: rig.camera.reference_point(),
            frame: (rig.camera.width, rig.camera.height),
            config,
            rng,
        }
    }

    fn project(&self, label: &SceneLabel, head: Position) -> Point {
        let (mx, my) = self
            .inversion
            .motor_to_screen(label.x - head.x, label.y - head.y);
        let (sx, sy) = self.calibration.motor_to_screen(mx, my);
        let px = (sx / self.mm_per_px.0).round() as i32;
        let py = (sy / self.mm_per_px.1).round() as i32;
        Point::new(self.reference.x + px, self.reference.y + py)
    }

    fn label_rect(&self, label: &SceneLabel, head: Position) -> Rect {
        let center = self.project(label, head);
        Rect::new(
            center.x - label.width_px / 2,
            center.y - label.height_px / 2,
            label.width_px,
            label.height_px,
        )
    }

    fn in_frame(&self, rect: &Rect) -> bool {
        rect.x >= 0
            && rect.y >= 0
            && rect.right() <= i64::from(self.frame.0)
            && rect.bottom() <= i64::from(self.frame.1)
    }

    /// One frame of detections; may be empty on a simulated dropout.
    pub fn detections(&mut self, head: Position) -> Vec<Detection> {
        if self.config.drop_rate > 0.0 && self.rng.gen_bool(self.config.drop_rate.min(1.0)) {
            return Vec::new();
        }
        let jitter = self.config.jitter_px.max(0);
        let mut detections = Vec::new();
        for label in &self.config.labels {
            let mut rect = self.label_rect(label, head);
            if jitter > 0 {
                rect.x += self.rng.gen_range(-jitter..=jitter);
                rect.y += self.rng.gen_range(-jitter..=jitter);
            }
            if self.in_frame(&rect) {
                detections.push(Detection::new(label.text.clone(), rect));
            }
        }
        detections
    }

    /// White frame with every visible label drawn as a dark block.
    pub fn render(&self, head: Position) -> GrayFrame {
        let (width, height) = (self.frame.0.max(1) as usize, self.frame.1.max(1) as usize);
        let mut frame = Array2::from_elem((height, width), 235u8);
        for label in &self.config.labels {
            let rect = self.label_rect(label, head);
            let x1 = rect.x.clamp(0, self.frame.0) as usize;
            let y1 = rect.y.clamp(0, self.frame.1) as usize;
            let x2 = (rect.x + rect.w).clamp(0, self.frame.0) as usize;
            let y2 = (rect.y + rect.h).clamp(0, self.frame.1) as usize;
            if x2 > x1 && y2 > y1 {
                frame.slice_mut(s![y1..y2, x1..x2]).fill(25);
            }
        }
        frame
    }
}

/// Feeds the rig's tracker and frame slot from the scene at the
/// configured rate until `cancel` fires.
pub fn spawn_scene(
    rig: Arc<Rig>,
    handle: SimulatedHandle,
    config: SceneConfig,
    cancel: CancelToken,
) -> JoinHandle<()> {
    let interval = Duration::try_from_secs_f64(1.0 / config.fps.max(1.0))
        .unwrap_or(Duration::from_millis(50));
    let render_every = config.render_every.max(1);
    thread::spawn(move || {
        let mut scene = Scene::new(config, &rig.config().snapshot());
        log::info!("synthetic scene running every {:?}", interval);
        let mut tick: u32 = 0;
        loop {
            let head = handle.position();
            rig.observe(&scene.detections(head));
            if tick % render_every == 0 {
                rig.frames().publish(scene.render(head));
            }
            tick = tick.wrapping_add(1);
            if cancel.sleep(interval) {
                break;
            }
        }
        log::info!("synthetic scene stopped");
    })
}
