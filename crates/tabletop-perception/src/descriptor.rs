//! Object descriptors: centroid, bounds, diameter segment and orientation.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion};
use rayon::prelude::*;
use tracing::debug;

use tabletop_types::{DetectedObject, PerceptionError, Point3, PointCloud, Quaternion, Vec3};

use crate::normals::estimate_normals;

/// Options for per-point normal estimation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalParams {
    /// Neighbourhood size.
    pub k: usize,
    /// Normals are flipped to face this point.
    pub viewpoint: Point3,
}

impl Default for NormalParams {
    fn default() -> Self {
        Self {
            k: 30,
            viewpoint: Vec3::zero(),
        }
    }
}

/// Describe the object formed by the finite points of `cloud`.
///
/// Orientation: the horizontal direction of the diameter segment is the
/// object's Y axis, world up its Z axis and `X = Y × Z`.  A vertical (or
/// zero-length) diameter yields the identity rotation.
///
/// # Errors
///
/// [`PerceptionError::EmptyCloud`] when `cloud` has no finite point.
pub fn describe_object(
    cloud: PointCloud,
    normals: Option<NormalParams>,
) -> Result<DetectedObject, PerceptionError> {
    let cloud = if cloud.iter().all(|p| p.is_finite()) {
        cloud
    } else {
        cloud.derive(cloud.iter().filter(|p| p.is_finite()).copied().collect())
    };
    let (Some(center), Some((min, max))) = (cloud.centroid(), cloud.bounds()) else {
        return Err(PerceptionError::EmptyCloud {
            stage: "object description".to_string(),
        });
    };

    let positions: Vec<Point3> = cloud.positions().collect();
    let segment = diameter(&positions);
    let orientation = orientation_from_segment(segment);
    let normals = normals.map(|params| estimate_normals(&cloud, params.k, params.viewpoint));

    debug!(
        points = cloud.len(),
        cx = center.x,
        cy = center.y,
        cz = center.z,
        "object described"
    );

    Ok(DetectedObject {
        cloud,
        center,
        min,
        max,
        segment,
        orientation,
        normals,
    })
}

/// The two points of `positions` farthest apart, earliest pair on ties.
/// A single point is its own diameter.
pub fn diameter(positions: &[Point3]) -> [Point3; 2] {
    let best = (0..positions.len())
        .into_par_iter()
        .map(|i| {
            let mut far = (0.0f32, i, i);
            for j in (i + 1)..positions.len() {
                let d = positions[i].distance_squared(positions[j]);
                if d > far.0 {
                    far = (d, i, j);
                }
            }
            far
        })
        .max_by(|a, b| a.0.total_cmp(&b.0).then(b.1.cmp(&a.1)));

    match best {
        Some((_, i, j)) => [positions[i], positions[j]],
        None => [Vec3::zero(), Vec3::zero()],
    }
}

/// Rotation whose Y axis is the horizontal direction of `segment` and whose
/// Z axis is world up.
pub fn orientation_from_segment(segment: [Point3; 2]) -> Quaternion {
    let d = segment[1] - segment[0];
    let Some(y) = Vec3::new(d.x, d.y, 0.0).normalized() else {
        return Quaternion::identity();
    };
    let z = Vec3::unit_z();
    let x = y.cross(z);

    let m = Matrix3::new(
        x.x, y.x, z.x, //
        x.y, y.y, z.y, //
        x.z, y.z, z.z,
    );
    let q = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(m));
    let c = q.into_inner().coords;
    let (w, i, j, k) = (c[3], c[0], c[1], c[2]);
    // q and -q are the same rotation; report the one with w >= 0.
    if w < 0.0 {
        Quaternion::new(-w, -i, -j, -k)
    } else {
        Quaternion::new(w, i, j, k)
    }
}
