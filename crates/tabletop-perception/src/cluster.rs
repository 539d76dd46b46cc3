//! Euclidean cluster extraction.
//!
//! Two points belong to the same cluster when a chain of points, each within
//! `tolerance` of the next, connects them.  Clusters are the connected
//! components of that relation, found by breadth-first search over spatial
//! radius queries.

use std::collections::VecDeque;

use tracing::debug;

use tabletop_types::{PerceptionError, PointCloud};

use crate::spatial::SpatialIndex;

/// Parameters of [`euclidean_clusters`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    /// Maximum gap between neighbouring points of one cluster (metres).
    pub tolerance: f32,
    pub min_size: usize,
    pub max_size: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            tolerance: 0.02,
            min_size: 50,
            max_size: 25_000,
        }
    }
}

/// Connected components of `cloud` whose size lies in
/// `[min_size, max_size]`, as ascending index lists.
///
/// Components outside the size range are discarded whole.  The result is
/// ordered by size (largest first), ties by smallest member index.
///
/// # Errors
///
/// [`PerceptionError::NoClustersFound`] when no component qualifies.
pub fn euclidean_clusters(
    cloud: &PointCloud,
    params: ClusterParams,
) -> Result<Vec<Vec<usize>>, PerceptionError> {
    let index = SpatialIndex::from_cloud(cloud);
    let points = cloud.points();
    let mut visited = vec![false; points.len()];
    let mut clusters = Vec::new();
    let mut components = 0usize;

    for seed in 0..points.len() {
        if visited[seed] || !points[seed].is_finite() {
            continue;
        }
        visited[seed] = true;
        let mut members = vec![seed];
        let mut queue = VecDeque::from([seed]);
        while let Some(current) = queue.pop_front() {
            for neighbour in index.radius_search(points[current].position(), params.tolerance) {
                if !visited[neighbour] {
                    visited[neighbour] = true;
                    members.push(neighbour);
                    queue.push_back(neighbour);
                }
            }
        }
        components += 1;

        if (params.min_size..=params.max_size).contains(&members.len()) {
            members.sort_unstable();
            clusters.push(members);
        }
    }

    clusters.sort_by(|a: &Vec<usize>, b: &Vec<usize>| b.len().cmp(&a.len()).then(a[0].cmp(&b[0])));
    debug!(
        points = points.len(),
        components,
        clusters = clusters.len(),
        tolerance = params.tolerance,
        "euclidean clustering"
    );

    if clusters.is_empty() {
        return Err(PerceptionError::NoClustersFound);
    }
    Ok(clusters)
}

/// Cluster `cloud` and return each cluster as its own cloud.
pub fn extract_clusters(
    cloud: &PointCloud,
    params: ClusterParams,
) -> Result<Vec<PointCloud>, PerceptionError> {
    Ok(euclidean_clusters(cloud, params)?
        .iter()
        .map(|indices| cloud.select(indices))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use tabletop_types::{Point, Vec3};

    fn blob(centre: Vec3, n: usize) -> Vec<Vec3> {
        // A line of points 5 mm apart.
        (0..n).map(|i| centre + Vec3::new(i as f32 * 0.005, 0.0, 0.0)).collect()
    }

    fn params(min_size: usize, max_size: usize) -> ClusterParams {
        ClusterParams {
            tolerance: 0.01,
            min_size,
            max_size,
        }
    }

    #[test]
    fn separates_distant_groups() {
        let mut pts = blob(Vec3::zero(), 10);
        pts.extend(blob(Vec3::new(1.0, 0.0, 0.0), 20));
        let cloud = PointCloud::from_positions("base_link", pts);
        let clusters = euclidean_clusters(&cloud, params(1, 100)).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].len(), 20);
        assert_eq!(clusters[0][0], 10);
        assert_eq!(clusters[1], (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn small_components_are_dropped() {
        let mut pts = blob(Vec3::zero(), 3);
        pts.extend(blob(Vec3::new(1.0, 0.0, 0.0), 20));
        let cloud = PointCloud::from_positions("base_link", pts);
        let clusters = euclidean_clusters(&cloud, params(5, 100)).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 20);
    }

    #[test]
    fn oversized_components_are_excluded_whole() {
        let mut pts = blob(Vec3::zero(), 50);
        pts.extend(blob(Vec3::new(1.0, 0.0, 0.0), 10));
        let cloud = PointCloud::from_positions("base_link", pts);
        let clusters = euclidean_clusters(&cloud, params(1, 30)).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0], (50..60).collect::<Vec<_>>());
    }

    #[test]
    fn nothing_qualifying_is_no_clusters() {
        let cloud = PointCloud::from_positions("base_link", blob(Vec3::zero(), 4));
        assert_eq!(
            euclidean_clusters(&cloud, params(10, 100)).unwrap_err(),
            PerceptionError::NoClustersFound
        );
    }

    #[test]
    fn equal_sizes_order_by_smallest_index() {
        let mut pts = blob(Vec3::new(2.0, 0.0, 0.0), 5);
        pts.extend(blob(Vec3::zero(), 5));
        let cloud = PointCloud::from_positions("base_link", pts);
        let clusters = euclidean_clusters(&cloud, params(1, 100)).unwrap();
        assert_eq!(clusters[0][0], 0);
        assert_eq!(clusters[1][0], 5);
    }

    #[test]
    fn invalid_points_join_no_cluster() {
        let mut points: Vec<Point> = blob(Vec3::zero(), 5).into_iter().map(Point::from).collect();
        points.push(Point::invalid());
        let cloud = PointCloud::unorganized("base_link", points);
        let clusters = euclidean_clusters(&cloud, params(1, 100)).unwrap();
        assert_eq!(clusters, vec![vec![0, 1, 2, 3, 4]]);
    }

    #[test]
    fn membership_is_invariant_under_permutation() {
        let mut pts = blob(Vec3::zero(), 12);
        pts.extend(blob(Vec3::new(0.0, 1.0, 0.0), 8));
        pts.extend(blob(Vec3::new(0.0, 0.0, 1.0), 15));

        let mut order: Vec<usize> = (0..pts.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(5));
        let shuffled: Vec<Vec3> = order.iter().map(|&i| pts[i]).collect();

        let as_sets = |cloud: &PointCloud| -> Vec<Vec<(i32, i32, i32)>> {
            let mut sets: Vec<Vec<(i32, i32, i32)>> = extract_clusters(cloud, params(1, 100))
                .unwrap()
                .iter()
                .map(|c| {
                    let mut keys: Vec<_> = c
                        .iter()
                        .map(|p| ((p.x * 1e4) as i32, (p.y * 1e4) as i32, (p.z * 1e4) as i32))
                        .collect();
                    keys.sort_unstable();
                    keys
                })
                .collect();
            sets.sort();
            sets
        };

        let a = as_sets(&PointCloud::from_positions("base_link", pts));
        let b = as_sets(&PointCloud::from_positions("base_link", shuffled));
        assert_eq!(a, b);
    }
}
