use crate::generator::scene::SceneConfig;
use anyhow::Context;
use pnpcore::RigConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Everything the station reads from its YAML file: the rig itself plus
/// the synthetic scene used in offline runs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RigFile {
    pub rig: RigConfig,
    pub scene: SceneConfig,
}

impl RigFile {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading rig file {}", path_ref.display()))?;
        let file: RigFile = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing rig file {}", path_ref.display()))?;
        Ok(file)
    }

    /// Command-line overrides on top of the file.
    pub fn with_port(mut self, port: Option<String>) -> Self {
        if let Some(port) = port {
            self.rig.discovery.port = Some(port);
        }
        self
    }
}
