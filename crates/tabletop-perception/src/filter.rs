//! Crop-box and voxel-grid filtering.
//!
//! The first CPU stage of every pipeline request: cut the transformed cloud
//! down to the working volume in front of the robot, then thin it out to one
//! point per voxel so the later stages see a bounded, roughly uniform density.

use serde::{Deserialize, Serialize};
use tracing::debug;

use tabletop_types::{PerceptionError, Point, PointCloud, Vec3};

/// Inclusive axis-aligned crop volume, in the cloud's frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CropBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl CropBox {
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Build from `[x_min, x_max, y_min, y_max, z_min, z_max]`.
    pub const fn from_limits(limits: [f32; 6]) -> Self {
        Self {
            min: Vec3::new(limits[0], limits[2], limits[4]),
            max: Vec3::new(limits[1], limits[3], limits[5]),
        }
    }

    pub fn contains(&self, p: &Point) -> bool {
        // One pass per axis, x then y then z; NaN fails every comparison.
        (0..3).all(|axis| {
            let v = p.position().axis(axis);
            v >= self.min.axis(axis) && v <= self.max.axis(axis)
        })
    }
}

/// Keep the points inside `bounds`, dropping invalid (non-finite) returns.
///
/// # Errors
///
/// [`PerceptionError::EmptyCloud`] when nothing survives the crop.
pub fn crop(cloud: &PointCloud, bounds: &CropBox) -> Result<PointCloud, PerceptionError> {
    let kept: Vec<Point> = cloud
        .iter()
        .filter(|p| p.is_finite() && bounds.contains(p))
        .copied()
        .collect();
    debug!(input = cloud.len(), kept = kept.len(), "crop box applied");
    if kept.is_empty() {
        return Err(PerceptionError::EmptyCloud {
            stage: "crop".to_string(),
        });
    }
    Ok(cloud.derive(kept))
}

/// Replace the points of every occupied cubic voxel of edge `leaf_size` by
/// their centroid.  Colors are averaged over the colored points of a voxel.
///
/// A non-positive (or non-finite) `leaf_size` disables downsampling; the
/// finite points are then returned unchanged.  Output is unorganized and
/// ordered by voxel coordinate.
pub fn voxel_downsample(cloud: &PointCloud, leaf_size: f32) -> PointCloud {
    let finite = cloud.iter().filter(|p| p.is_finite());
    if !(leaf_size > 0.0 && leaf_size.is_finite()) {
        return cloud.derive(finite.copied().collect());
    }

    let inv = 1.0 / f64::from(leaf_size);
    let mut keyed: Vec<([i64; 3], &Point)> = finite
        .map(|p| {
            let key = [
                (f64::from(p.x) * inv).floor() as i64,
                (f64::from(p.y) * inv).floor() as i64,
                (f64::from(p.z) * inv).floor() as i64,
            ];
            (key, p)
        })
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0));

    let points: Vec<Point> = keyed
        .chunk_by(|a, b| a.0 == b.0)
        .map(|cell| VoxelAccumulator::collect(cell.iter().map(|(_, p)| *p)))
        .collect();

    debug!(input = cloud.len(), output = points.len(), leaf_size, "voxel grid applied");
    cloud.derive(points)
}

/// Crop, then downsample.
///
/// # Errors
///
/// [`PerceptionError::EmptyCloud`] when the crop leaves nothing.
pub fn filter_cloud(
    cloud: &PointCloud,
    bounds: &CropBox,
    leaf_size: f32,
) -> Result<PointCloud, PerceptionError> {
    let cropped = crop(cloud, bounds)?;
    Ok(voxel_downsample(&cropped, leaf_size))
}

#[derive(Default)]
struct VoxelAccumulator {
    position: [f64; 3],
    count: usize,
    color: [u64; 3],
    colored: u64,
}

impl VoxelAccumulator {
    fn collect<'a>(points: impl Iterator<Item = &'a Point>) -> Point {
        let mut acc = Self::default();
        for p in points {
            acc.position[0] += f64::from(p.x);
            acc.position[1] += f64::from(p.y);
            acc.position[2] += f64::from(p.z);
            acc.count += 1;
            if let Some([r, g, b]) = p.rgb {
                acc.color[0] += u64::from(r);
                acc.color[1] += u64::from(g);
                acc.color[2] += u64::from(b);
                acc.colored += 1;
            }
        }
        acc.finish()
    }

    fn finish(&self) -> Point {
        let n = self.count.max(1) as f64;
        let mut point = Point::new(
            (self.position[0] / n) as f32,
            (self.position[1] / n) as f32,
            (self.position[2] / n) as f32,
        );
        if self.colored > 0 {
            let avg = |c: u64| ((c + self.colored / 2) / self.colored) as u8;
            point.rgb = Some([avg(self.color[0]), avg(self.color[1]), avg(self.color[2])]);
        }
        point
    }
}
