//! Radius outlier removal.

use rayon::prelude::*;
use tracing::debug;

use tabletop_types::PointCloud;

use crate::spatial::SpatialIndex;

/// Parameters of [`remove_radius_outliers`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierParams {
    /// Search radius (metres).
    pub radius: f32,
    /// Minimum number of *other* points required within `radius`.
    pub min_neighbors: usize,
}

/// Drop every point with fewer than `min_neighbors` other points within
/// `radius`.  Invalid points are dropped as well.  Order is preserved.
pub fn remove_radius_outliers(cloud: &PointCloud, params: OutlierParams) -> PointCloud {
    let keep = inlier_indices(cloud, params);
    debug!(
        input = cloud.len(),
        kept = keep.len(),
        radius = params.radius,
        min_neighbors = params.min_neighbors,
        "radius outlier removal"
    );
    cloud.select(&keep)
}

/// Indices of the points that survive [`remove_radius_outliers`], ascending.
pub fn inlier_indices(cloud: &PointCloud, params: OutlierParams) -> Vec<usize> {
    let index = SpatialIndex::from_cloud(cloud);
    cloud
        .points()
        .par_iter()
        .enumerate()
        .filter_map(|(i, p)| {
            if !p.is_finite() {
                return None;
            }
            // The query point finds itself; discount it.
            let others = index
                .radius_search(p.position(), params.radius)
                .len()
                .saturating_sub(1);
            (others >= params.min_neighbors).then_some(i)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletop_types::{Point, Vec3};

    fn params(radius: f32, min_neighbors: usize) -> OutlierParams {
        OutlierParams {
            radius,
            min_neighbors,
        }
    }

    #[test]
    fn isolated_point_is_removed() {
        let mut pts: Vec<Vec3> = (0..10).map(|i| Vec3::new(i as f32 * 0.01, 0.0, 0.0)).collect();
        pts.push(Vec3::new(5.0, 5.0, 5.0));
        let cloud = PointCloud::from_positions("base_link", pts);
        let out = remove_radius_outliers(&cloud, params(0.05, 2));
        assert_eq!(out.len(), 10);
        assert!(out.iter().all(|p| p.x < 1.0));
    }

    #[test]
    fn self_is_not_counted_as_neighbor() {
        // Two points 1 cm apart each have exactly one neighbor.
        let cloud = PointCloud::from_positions(
            "base_link",
            [Vec3::zero(), Vec3::new(0.01, 0.0, 0.0)],
        );
        assert_eq!(remove_radius_outliers(&cloud, params(0.02, 1)).len(), 2);
        assert!(remove_radius_outliers(&cloud, params(0.02, 2)).is_empty());
    }

    #[test]
    fn zero_min_neighbors_keeps_every_valid_point() {
        let cloud = PointCloud::unorganized(
            "base_link",
            vec![Point::new(0.0, 0.0, 0.0), Point::invalid(), Point::new(9.0, 9.0, 9.0)],
        );
        assert_eq!(inlier_indices(&cloud, params(0.01, 0)), vec![0, 2]);
    }

    #[test]
    fn order_is_preserved() {
        let cloud = PointCloud::from_positions(
            "base_link",
            (0..20).rev().map(|i| Vec3::new(i as f32 * 0.005, 0.0, 0.0)),
        );
        let out = remove_radius_outliers(&cloud, params(0.02, 1));
        let xs: Vec<f32> = out.iter().map(|p| p.x).collect();
        assert!(xs.windows(2).all(|w| w[0] > w[1]));
    }
}
