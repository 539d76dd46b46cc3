//! Pipeline tuning parameters.
//!
//! Every field has a default, so an empty TOML table (or no file at all)
//! yields a working configuration.  Sections mirror the stages:
//!
//! ```toml
//! fixed_frame = "base_link"
//! input_timeout_ms = 5000
//!
//! [filters]
//! pass_limits = [0.0, 2.0, -1.0, 1.0, 0.3, 1.5]
//! leaf_size = 0.01
//!
//! [segmentation]
//! min_plane_size = 1000
//!
//! [clustering]
//! tolerance = 0.02
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use tabletop_perception::cluster::ClusterParams;
use tabletop_perception::descriptor::NormalParams;
use tabletop_perception::filter::CropBox;
use tabletop_perception::hull::HeightBand;
use tabletop_perception::outlier::OutlierParams;
use tabletop_perception::segmentation::RansacParams;
use tabletop_types::Vec3;

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Frame every result is expressed in.
    #[serde(default = "default_fixed_frame")]
    pub fixed_frame: String,

    /// How long a request waits for the first sensor frame.
    #[serde(default = "default_input_timeout_ms")]
    pub input_timeout_ms: u64,

    /// Poll period while waiting for input or a transform.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long a request waits for the sensor → fixed frame transform.
    #[serde(default = "default_transform_timeout_ms")]
    pub transform_timeout_ms: u64,

    #[serde(default)]
    pub filters: FilterConfig,

    #[serde(default)]
    pub segmentation: SegmentationConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub normals: NormalsConfig,
}

fn default_fixed_frame() -> String {
    "base_link".to_string()
}
fn default_input_timeout_ms() -> u64 {
    5000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_transform_timeout_ms() -> u64 {
    2000
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            fixed_frame: default_fixed_frame(),
            input_timeout_ms: default_input_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            transform_timeout_ms: default_transform_timeout_ms(),
            filters: FilterConfig::default(),
            segmentation: SegmentationConfig::default(),
            clustering: ClusteringConfig::default(),
            normals: NormalsConfig::default(),
        }
    }
}

/// Crop box, voxel grid, prism band and outlier removal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// `[x_min, x_max, y_min, y_max, z_min, z_max]` in the fixed frame.
    pub pass_limits: [f32; 6],
    /// Voxel edge; `<= 0` disables downsampling.
    pub leaf_size: f32,
    /// `[low, high]` height band above the table plane.
    pub prism_limits: [f32; 2],
    pub outlier_radius: f32,
    pub outlier_min_neighbors: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            pass_limits: [0.0, 2.0, -1.0, 1.0, 0.3, 1.5],
            leaf_size: 0.01,
            prism_limits: [0.01, 0.5],
            outlier_radius: 0.02,
            outlier_min_neighbors: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmentationConfig {
    /// Angular tolerance (degrees) of the optional axis constraint.
    pub eps_angle: f32,
    pub single_distance_threshold: f32,
    pub multi_distance_threshold: f32,
    pub min_plane_size: usize,
    pub max_iterations: usize,
    /// Plane normals must lie within `eps_angle` of this axis when set.
    pub axis: Option<[f32; 3]>,
    /// Fixed RANSAC seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for SegmentationConfig {
    fn default() -> Self {
        Self {
            eps_angle: 5.0,
            single_distance_threshold: 0.01,
            multi_distance_threshold: 0.02,
            min_plane_size: 1000,
            max_iterations: 200,
            axis: None,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub tolerance: f32,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.02,
            min_size: 50,
            max_size: 25_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalsConfig {
    pub k_search: usize,
    /// Normals are flipped towards this point of the fixed frame.
    pub viewpoint: [f32; 3],
}

impl Default for NormalsConfig {
    fn default() -> Self {
        Self {
            k_search: 30,
            viewpoint: [0.0, 0.0, 0.0],
        }
    }
}

impl PipelineConfig {
    pub fn input_timeout(&self) -> Duration {
        Duration::from_millis(self.input_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn transform_timeout(&self) -> Duration {
        Duration::from_millis(self.transform_timeout_ms)
    }

    pub fn crop_box(&self) -> CropBox {
        CropBox::from_limits(self.filters.pass_limits)
    }

    pub fn height_band(&self) -> HeightBand {
        let [low, high] = self.filters.prism_limits;
        HeightBand::new(low, high)
    }

    pub fn outlier_params(&self) -> OutlierParams {
        OutlierParams {
            radius: self.filters.outlier_radius,
            min_neighbors: self.filters.outlier_min_neighbors,
        }
    }

    /// RANSAC parameters of single-plane mode.
    pub fn single_plane_params(&self) -> RansacParams {
        self.ransac(self.segmentation.single_distance_threshold)
    }

    /// RANSAC parameters of multi-plane mode.
    pub fn multi_plane_params(&self) -> RansacParams {
        self.ransac(self.segmentation.multi_distance_threshold)
    }

    fn ransac(&self, distance_threshold: f32) -> RansacParams {
        let s = &self.segmentation;
        RansacParams {
            distance_threshold,
            max_iterations: s.max_iterations,
            axis: s.axis.map(|[x, y, z]| Vec3::new(x, y, z)),
            eps_angle_deg: s.eps_angle,
            seed: s.seed,
        }
    }

    pub fn cluster_params(&self) -> ClusterParams {
        ClusterParams {
            tolerance: self.clustering.tolerance,
            min_size: self.clustering.min_size,
            max_size: self.clustering.max_size,
        }
    }

    pub fn normal_params(&self) -> NormalParams {
        let [x, y, z] = self.normals.viewpoint;
        NormalParams {
            k: self.normals.k_search,
            viewpoint: Vec3::new(x, y, z),
        }
    }
}

/// Apply `TABLETOP_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TABLETOP_FIXED_FRAME` | `fixed_frame` |
/// | `TABLETOP_LEAF_SIZE` | `filters.leaf_size` |
/// | `TABLETOP_CLUSTER_TOLERANCE` | `clustering.tolerance` |
/// | `TABLETOP_INPUT_TIMEOUT_MS` | `input_timeout_ms` |
/// | `TABLETOP_TRANSFORM_TIMEOUT_MS` | `transform_timeout_ms` |
///
/// Unparsable values are ignored with a warning.
pub fn apply_env_overrides(cfg: &mut PipelineConfig) {
    if let Ok(v) = std::env::var("TABLETOP_FIXED_FRAME") {
        cfg.fixed_frame = v;
    }
    override_parsed("TABLETOP_LEAF_SIZE", &mut cfg.filters.leaf_size);
    override_parsed("TABLETOP_CLUSTER_TOLERANCE", &mut cfg.clustering.tolerance);
    override_parsed("TABLETOP_INPUT_TIMEOUT_MS", &mut cfg.input_timeout_ms);
    override_parsed("TABLETOP_TRANSFORM_TIMEOUT_MS", &mut cfg.transform_timeout_ms);
}

fn override_parsed<T: std::str::FromStr>(var: &str, field: &mut T) {
    if let Ok(v) = std::env::var(var) {
        match v.parse::<T>() {
            Ok(parsed) => *field = parsed,
            Err(_) => warn!(var, value = %v, "ignoring unparsable override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: PipelineConfig = toml::from_str("").expect("parse");
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.fixed_frame, "base_link");
        assert_eq!(cfg.segmentation.min_plane_size, 1000);
        assert_eq!(cfg.clustering.max_size, 25_000);
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let cfg: PipelineConfig = toml::from_str(
            r#"
            fixed_frame = "map"
            [filters]
            leaf_size = 0.005
            [segmentation]
            axis = [0.0, 0.0, 1.0]
            seed = 7
            "#,
        )
        .expect("parse");
        assert_eq!(cfg.fixed_frame, "map");
        assert_eq!(cfg.filters.leaf_size, 0.005);
        assert_eq!(cfg.filters.outlier_min_neighbors, 10);
        assert_eq!(cfg.segmentation.max_iterations, 200);
        let params = cfg.single_plane_params();
        assert_eq!(params.axis, Some(Vec3::unit_z()));
        assert_eq!(params.seed, Some(7));
    }

    #[test]
    fn toml_roundtrip() {
        let mut cfg = PipelineConfig::default();
        cfg.segmentation.seed = Some(3);
        let raw = toml::to_string_pretty(&cfg).expect("serialize");
        let back: PipelineConfig = toml::from_str(&raw).expect("parse");
        assert_eq!(back, cfg);
    }

    #[test]
    fn derived_parameters_follow_sections() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.single_plane_params().distance_threshold, 0.01);
        assert_eq!(cfg.multi_plane_params().distance_threshold, 0.02);
        assert_eq!(cfg.height_band(), HeightBand::new(0.01, 0.5));
        assert_eq!(cfg.crop_box().max, Vec3::new(2.0, 1.0, 1.5));
        assert_eq!(cfg.input_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.normal_params().k, 30);
    }

    #[test]
    fn apply_env_overrides_changes_fields() {
        // SAFETY: these variables are only touched by this test.
        unsafe {
            std::env::set_var("TABLETOP_FIXED_FRAME", "odom");
            std::env::set_var("TABLETOP_CLUSTER_TOLERANCE", "0.05");
            std::env::set_var("TABLETOP_TRANSFORM_TIMEOUT_MS", "not-a-number");
        }
        let mut cfg = PipelineConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.fixed_frame, "odom");
        assert_eq!(cfg.clustering.tolerance, 0.05);
        assert_eq!(cfg.transform_timeout_ms, 2000);
        unsafe {
            std::env::remove_var("TABLETOP_FIXED_FRAME");
            std::env::remove_var("TABLETOP_CLUSTER_TOLERANCE");
            std::env::remove_var("TABLETOP_TRANSFORM_TIMEOUT_MS");
        }
    }
}
