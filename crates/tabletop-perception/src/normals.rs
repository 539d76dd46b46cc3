//! Per-point surface normals from k-nearest-neighbour covariance.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use tracing::debug;

use tabletop_types::{Point3, PointCloud, Vec3};

use crate::spatial::SpatialIndex;

/// Estimate one unit normal per point of `cloud`.
///
/// Each normal is the eigenvector of the smallest eigenvalue of the
/// covariance of the point's `k` nearest neighbours (itself included), and
/// is flipped to face `viewpoint`.  Points with fewer than three neighbours
/// get world up; non-finite points get a non-finite normal so that the
/// result stays index-aligned with the cloud.
pub fn estimate_normals(cloud: &PointCloud, k: usize, viewpoint: Point3) -> Vec<Vec3> {
    let index = SpatialIndex::from_cloud(cloud);
    let positions: Vec<Point3> = cloud.positions().collect();

    let normals: Vec<Vec3> = positions
        .par_iter()
        .map(|&p| {
            if !p.is_finite() {
                return Vec3::new(f32::NAN, f32::NAN, f32::NAN);
            }
            let neighbours = index.nearest_k(p, k);
            let normal = if neighbours.len() < 3 {
                Vec3::unit_z()
            } else {
                smallest_eigenvector(neighbours.iter().map(|&i| positions[i]))
                    .unwrap_or_else(Vec3::unit_z)
            };
            orient_towards(normal, p, viewpoint)
        })
        .collect();

    debug!(points = cloud.len(), k, "normals estimated");
    normals
}

/// Flip `normal` so it points from `p` towards `viewpoint`.
pub fn orient_towards(normal: Vec3, p: Point3, viewpoint: Point3) -> Vec3 {
    if normal.dot(viewpoint - p) < 0.0 { -normal } else { normal }
}

/// Direction of least spread of a point set: the unit eigenvector of the
/// smallest eigenvalue of its covariance.  `None` for an empty set or a
/// numerically broken decomposition.
pub fn smallest_eigenvector(points: impl Iterator<Item = Point3>) -> Option<Vec3> {
    let pts: Vec<Vector3<f64>> = points
        .map(|p| Vector3::new(f64::from(p.x), f64::from(p.y), f64::from(p.z)))
        .collect();
    if pts.is_empty() {
        return None;
    }
    let n = pts.len() as f64;
    let centroid = pts.iter().fold(Vector3::zeros(), |acc, p| acc + p) / n;
    let mut cov = Matrix3::<f64>::zeros();
    for p in &pts {
        let d = p - centroid;
        cov += d * d.transpose();
    }
    cov /= n;

    let eigen = SymmetricEigen::new(cov);
    let mut min_idx = 0;
    for i in 1..3 {
        if eigen.eigenvalues[i] < eigen.eigenvalues[min_idx] {
            min_idx = i;
        }
    }
    let v = eigen.eigenvectors.column(min_idx);
    Vec3::new(v[0] as f32, v[1] as f32, v[2] as f32).normalized()
}
