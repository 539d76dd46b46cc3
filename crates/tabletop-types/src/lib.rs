//! `tabletop-types` – shared value types for the tabletop perception stack.
//!
//! # Modules
//!
//! - [`geometry`] – [`Vec3`] / [`Point3`] and unit [`Quaternion`] rotations.
//! - [`cloud`] – [`PointCloud`], the checked [`OrganizedCloud`] wrapper and
//!   pixel addressing types.
//! - [`scene`] – the pipeline's outputs: [`Plane`], [`PlaneAxis`] and
//!   [`DetectedObject`].
//!
//! Every pipeline failure is reported as a [`PerceptionError`].

pub mod cloud;
pub mod geometry;
pub mod scene;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use cloud::{OrganizedCloud, Pixel, PixelRect, Point, PointCloud};
pub use geometry::{Point3, Quaternion, Vec3};
pub use scene::{DetectedObject, Plane, PlaneAxis};

/// Failure taxonomy of a single pipeline invocation.
///
/// None of these are fatal to the process; each describes why one request
/// produced no result.  Use [`PerceptionError::is_benign`] to tell "the scene
/// holds nothing of interest" apart from infrastructure problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PerceptionError {
    #[error("No point cloud received within {waited_ms} ms")]
    NoInput { waited_ms: u64 },

    #[error("Transform {source_frame} -> {target_frame} unavailable: {reason}")]
    TransformUnavailable {
        source_frame: String,
        target_frame: String,
        reason: String,
    },

    #[error("Point cloud is empty after {stage}")]
    EmptyCloud { stage: String },

    #[error("No plane found")]
    NoPlaneFound,

    #[error("Nothing found in the region above the plane")]
    EmptyRegion,

    #[error("No clusters found")]
    NoClustersFound,

    #[error("No valid point at pixel ({col}, {row})")]
    InvalidPixel { col: usize, row: usize },

    #[error("Invalid point cloud: {reason}")]
    InvalidCloud { reason: String },
}

impl PerceptionError {
    /// True for the expected "nothing found" outcomes of normal operation.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            PerceptionError::EmptyCloud { .. }
                | PerceptionError::NoPlaneFound
                | PerceptionError::EmptyRegion
                | PerceptionError::NoClustersFound
                | PerceptionError::InvalidPixel { .. }
        )
    }
}
