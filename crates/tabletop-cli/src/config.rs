//! Configuration vault – reads `~/.tabletop/config.toml`.
//!
//! The file holds the pipeline parameters plus the static transforms that
//! relate the sensor frame to the fixed frame:
//!
//! ```toml
//! fixed_frame = "base_link"
//!
//! [filters]
//! leaf_size = 0.01
//!
//! [[transforms]]
//! parent = "base_link"
//! child = "camera"
//! translation = [0.0, 0.0, 1.2]
//! rotation = [1.0, 0.0, 0.0, 0.0]
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use tabletop_perception::transform::{SharedTfEngine, Transform3D};
use tabletop_runtime::PipelineConfig;
use tabletop_types::{Quaternion, Vec3};

/// A fixed parent ← child pose.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticTransform {
    pub parent: String,
    pub child: String,
    #[serde(default)]
    pub translation: [f32; 3],
    /// Unit quaternion `[w, x, y, z]`.
    #[serde(default = "identity_rotation")]
    pub rotation: [f32; 4],
}

fn identity_rotation() -> [f32; 4] {
    [1.0, 0.0, 0.0, 0.0]
}

impl StaticTransform {
    pub fn transform(&self) -> Transform3D {
        let [x, y, z] = self.translation;
        let [w, i, j, k] = self.rotation;
        Transform3D::new(Vec3::new(x, y, z), Quaternion::new(w, i, j, k).normalized())
    }
}

/// Persisted CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub pipeline: PipelineConfig,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<StaticTransform>,
}

impl CliConfig {
    /// Transform graph seeded with every configured static transform.
    pub fn tf_engine(&self) -> SharedTfEngine {
        let tf = SharedTfEngine::new();
        for t in &self.transforms {
            tf.set_transform(&t.parent, &t.child, t.transform());
        }
        tf
    }
}

/// Return the path to `~/.tabletop/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tabletop").join("config.toml")
}

/// Load the config at `path`, or the default location when `None`.
///
/// A missing file yields the defaults.  `TABLETOP_*` overrides are applied
/// either way.
pub fn load(path: Option<&Path>) -> Result<CliConfig, String> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let mut cfg = load_from(&path)?.unwrap_or_default();
    tabletop_runtime::apply_env_overrides(&mut cfg.pipeline);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does not
/// exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<CliConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}
