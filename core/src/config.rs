use crate::geometry::{AxisMapping, Point};
use crate::scenario::{MasterScenario, Scenario};
use crate::vision::VerificationSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Pixel-to-millimeter calibration and centering loop limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub pixel_to_mm_x: f64,
    pub pixel_to_mm_y: f64,
    pub swap_axes: bool,
    #[serde(alias = "negate_screen_x")]
    pub negate_x: bool,
    #[serde(alias = "negate_screen_y")]
    pub negate_y: bool,
    #[serde(alias = "auto_center_tolerance")]
    pub coarse_tolerance_px: i32,
    pub fine_tune_step_mm: f64,
    pub fine_tune_enabled: bool,
    #[serde(alias = "auto_center_max_iter")]
    pub max_iterations: usize,
    pub fine_iterations: usize,
    pub scan_step_mm: f64,
    pub wide_scan_step_mm: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            pixel_to_mm_x: 0.02,
            pixel_to_mm_y: 0.02,
            swap_axes: false,
            negate_x: true,
            negate_y: true,
            coarse_tolerance_px: 5,
            fine_tune_step_mm: 0.05,
            fine_tune_enabled: true,
            max_iterations: 10,
            fine_iterations: 5,
            scan_step_mm: 0.5,
            wide_scan_step_mm: 1.0,
        }
    }
}

impl CalibrationConfig {
    pub fn axes(&self) -> AxisMapping {
        AxisMapping {
            swap_axes: self.swap_axes,
            negate_x: self.negate_x,
            negate_y: self.negate_y,
        }
    }

    pub fn fine_tolerance_px(&self) -> i32 {
        (self.coarse_tolerance_px / 2).max(1)
    }
}

/// Camera geometry; the reference point defaults to the frame center.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub width: i32,
    pub height: i32,
    pub target_x: Option<i32>,
    pub target_y: Option<i32>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            target_x: None,
            target_y: None,
        }
    }
}

impl CameraConfig {
    pub fn frame_center(&self) -> Point {
        Point::new(self.width / 2, self.height / 2)
    }

    pub fn reference_point(&self) -> Point {
        let center = self.frame_center();
        Point::new(
            self.target_x.unwrap_or(center.x),
            self.target_y.unwrap_or(center.y),
        )
    }
}

/// Which labels the rig looks for when no explicit word is requested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetingConfig {
    pub target_text: String,
    pub target_words: Vec<String>,
    pub ocr_groups: BTreeMap<String, Vec<String>>,
    pub target_group: String,
    pub selected_target_word: String,
}

impl Default for TargetingConfig {
    fn default() -> Self {
        let mut ocr_groups = BTreeMap::new();
        ocr_groups.insert(
            "Default".to_string(),
            ["TEST", "AYD", "CRB", "MUS", "SHN"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        Self {
            target_text: "TEST".into(),
            target_words: vec!["TEST".into()],
            ocr_groups,
            target_group: "Default".into(),
            selected_target_word: String::new(),
        }
    }
}

impl TargetingConfig {
    /// Every word of every OCR group, in group order.
    pub fn known_words(&self) -> Vec<String> {
        self.ocr_groups.values().flatten().cloned().collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub iou_threshold: f64,
    pub fallback_radius_px: f64,
    pub growth_limit: f64,
    pub stability_window_secs: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.4,
            fallback_radius_px: 50.0,
            growth_limit: 1.5,
            stability_window_secs: 0.1,
        }
    }
}

/// Filters applied to raw recognizer words before they reach the tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrFilterConfig {
    pub min_confidence: f32,
    pub min_word_length: usize,
    pub min_box_side_px: i32,
    pub max_area_fraction: f64,
    pub fuzzy_cutoff: f64,
}

impl Default for OcrFilterConfig {
    fn default() -> Self {
        Self {
            min_confidence: 40.0,
            min_word_length: 3,
            min_box_side_px: 5,
            max_area_fraction: 0.25,
            fuzzy_cutoff: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    pub feed_rate: f64,
    pub invert_x: bool,
    pub invert_y: bool,
    pub command_timeout_ms: u64,
    pub homing_timeout_ms: u64,
    pub status_timeout_ms: u64,
    pub pump_off_repeat_delay_ms: u64,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            feed_rate: 1000.0,
            invert_x: true,
            invert_y: false,
            command_timeout_ms: 5_000,
            homing_timeout_ms: 60_000,
            status_timeout_ms: 1_000,
            pump_off_repeat_delay_ms: 300,
        }
    }
}

impl MotionConfig {
    pub fn command_timeout(&self) -> Duration {
        millis(self.command_timeout_ms)
    }

    pub fn homing_timeout(&self) -> Duration {
        millis(self.homing_timeout_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        millis(self.status_timeout_ms)
    }

    pub fn pump_off_repeat_delay(&self) -> Duration {
        millis(self.pump_off_repeat_delay_ms)
    }
}

/// Serial device discovery and reset handshake timings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub port: Option<String>,
    pub baud_rate: u32,
    pub port_patterns: Vec<String>,
    pub banner: String,
    pub probe_reset_ms: u64,
    pub probe_boot_ms: u64,
    pub probe_window_ms: u64,
    pub reset_low_ms: u64,
    pub boot_wait_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: 115_200,
            port_patterns: vec!["/dev/ttyUSB".into(), "/dev/ttyACM".into()],
            banner: "grbl".into(),
            probe_reset_ms: 500,
            probe_boot_ms: 3_000,
            probe_window_ms: 2_000,
            reset_low_ms: 1_000,
            boot_wait_ms: 2_000,
        }
    }
}

/// Settle delays of the centering loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CenteringTiming {
    pub start_settle_ms: u64,
    pub poll_interval_ms: u64,
    pub acquire_waits: usize,
    pub reacquire_waits: usize,
    pub fine_reacquire_waits: usize,
    pub small_scan_iterations: usize,
    pub iteration_settle_ms: u64,
    pub stabilization_ms: u64,
    pub transition_ms: u64,
    pub fine_settle_ms: u64,
    pub final_check_ms: u64,
}

impl Default for CenteringTiming {
    fn default() -> Self {
        Self {
            start_settle_ms: 500,
            poll_interval_ms: 800,
            acquire_waits: 2,
            reacquire_waits: 3,
            fine_reacquire_waits: 2,
            small_scan_iterations: 3,
            iteration_settle_ms: 500,
            stabilization_ms: 1_500,
            transition_ms: 2_000,
            fine_settle_ms: 1_000,
            final_check_ms: 1_000,
        }
    }
}

impl CenteringTiming {
    /// Zero-delay timings for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            start_settle_ms: 0,
            poll_interval_ms: 0,
            iteration_settle_ms: 0,
            stabilization_ms: 0,
            transition_ms: 0,
            fine_settle_ms: 0,
            final_check_ms: 0,
            ..Self::default()
        }
    }

    pub fn start_settle(&self) -> Duration {
        millis(self.start_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        millis(self.poll_interval_ms)
    }

    pub fn iteration_settle(&self) -> Duration {
        millis(self.iteration_settle_ms)
    }

    pub fn stabilization(&self) -> Duration {
        millis(self.stabilization_ms)
    }

    pub fn transition(&self) -> Duration {
        millis(self.transition_ms)
    }

    pub fn fine_settle(&self) -> Duration {
        millis(self.fine_settle_ms)
    }

    pub fn final_check(&self) -> Duration {
        millis(self.final_check_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioTiming {
    pub step_pause_ms: u64,
    pub verification_settle_ms: u64,
}

impl Default for ScenarioTiming {
    fn default() -> Self {
        Self {
            step_pause_ms: 300,
            verification_settle_ms: 1_000,
        }
    }
}

impl ScenarioTiming {
    pub fn step_pause(&self) -> Duration {
        millis(self.step_pause_ms)
    }

    pub fn verification_settle(&self) -> Duration {
        millis(self.verification_settle_ms)
    }
}

/// A named machine position ("base").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedPosition {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// Everything the rig reads at run time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub calibration: CalibrationConfig,
    pub camera: CameraConfig,
    pub targeting: TargetingConfig,
    pub tracker: TrackerConfig,
    pub ocr: OcrFilterConfig,
    pub motion: MotionConfig,
    pub discovery: DiscoveryConfig,
    pub centering_timing: CenteringTiming,
    pub scenario_timing: ScenarioTiming,
    pub auto_home: bool,
    pub bases: Vec<SavedPosition>,
    pub scenarios: Vec<Scenario>,
    pub master_scenarios: Vec<MasterScenario>,
    pub verification: VerificationSpec,
}

impl RigConfig {
    pub fn base(&self, name: &str) -> Option<&SavedPosition> {
        self.bases.iter().find(|base| base.name == name)
    }

    pub fn scenario(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|scenario| scenario.name == name)
    }

    pub fn master_scenario(&self, name: &str) -> Option<&MasterScenario> {
        self.master_scenarios
            .iter()
            .find(|master| master.name == name)
    }
}

/// Atomically replaceable configuration shared by every worker.
///
/// Readers take a snapshot per operation; writers swap the whole value.
#[derive(Debug, Default)]
pub struct ConfigStore {
    current: RwLock<Arc<RigConfig>>,
}

impl ConfigStore {
    pub fn new(config: RigConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<RigConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn replace(&self, config: RigConfig) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(config);
    }

    /// Copy-on-write edit; concurrent readers keep their old snapshot.
    pub fn update<F>(&self, edit: F) -> Arc<RigConfig>
    where
        F: FnOnce(&mut RigConfig),
    {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = RigConfig::clone(&guard);
        edit(&mut next);
        *guard = Arc::new(next);
        Arc::clone(&guard)
    }

    pub fn upsert_base(&self, base: SavedPosition) {
        self.update(|config| {
            match config.bases.iter_mut().find(|b| b.name == base.name) {
                Some(existing) => *existing = base,
                None => config.bases.push(base),
            }
        });
    }

    pub fn remove_base(&self, name: &str) -> bool {
        let before = self.snapshot().bases.len();
        self.update(|config| config.bases.retain(|b| b.name != name))
            .bases
            .len()
            < before
    }

    pub fn upsert_scenario(&self, scenario: Scenario) {
        self.update(|config| {
            match config
                .scenarios
                .iter_mut()
                .find(|s| s.name == scenario.name)
            {
                Some(existing) => *existing = scenario,
                None => config.scenarios.push(scenario),
            }
        });
    }

    pub fn remove_scenario(&self, name: &str) -> bool {
        let before = self.snapshot().scenarios.len();
        self.update(|config| config.scenarios.retain(|s| s.name != name))
            .scenarios
            .len()
            < before
    }

    pub fn upsert_master_scenario(&self, master: MasterScenario) {
        self.update(|config| {
            match config
                .master_scenarios
                .iter_mut()
                .find(|m| m.name == master.name)
            {
                Some(existing) => *existing = master,
                None => config.master_scenarios.push(master),
            }
        });
    }

    pub fn remove_master_scenario(&self, name: &str) -> bool {
        let before = self.snapshot().master_scenarios.len();
        self.update(|config| config.master_scenarios.retain(|m| m.name != name))
            .master_scenarios
            .len()
            < before
    }

    pub fn add_target_word(&self, word: &str) {
        let word = word.trim();
        if word.is_empty() {
            return;
        }
        self.update(|config| {
            if !config.targeting.target_words.iter().any(|w| w == word) {
                config.targeting.target_words.push(word.to_string());
            }
        });
    }

    pub fn remove_target_word(&self, word: &str) {
        let word = word.trim();
        self.update(|config| config.targeting.target_words.retain(|w| w != word));
    }
}
