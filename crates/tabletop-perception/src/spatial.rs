//! Spatial index for neighbourhood queries over a point set.
//!
//! [`SpatialIndex`] bulk-loads the finite points of a set into an R*-tree so
//! that clustering, outlier removal and normal estimation can ask "which
//! points lie within `r` of p?" and "which are the k closest points to p?"
//! without comparing all pairs.  Results are indices into the original set.
//!
//! # Example
//!
//! ```rust
//! use tabletop_perception::spatial::SpatialIndex;
//! use tabletop_types::Vec3;
//!
//! let points = [
//!     Vec3::new(0.0, 0.0, 0.0),
//!     Vec3::new(0.01, 0.0, 0.0),
//!     Vec3::new(1.0, 1.0, 1.0),
//! ];
//! let index = SpatialIndex::build(&points);
//!
//! let mut near = index.radius_search(Vec3::zero(), 0.05);
//! near.sort_unstable();
//! assert_eq!(near, vec![0, 1]);
//! assert_eq!(index.nearest_k(Vec3::new(0.9, 0.9, 0.9), 1), vec![2]);
//! ```

use rstar::{AABB, PointDistance, RTree, RTreeObject};

use tabletop_types::{Point3, PointCloud};

/// A point of the indexed set, tagged with its position in that set.
#[derive(Debug, Clone, Copy)]
struct Entry(usize, [f32; 3]);

impl RTreeObject for Entry {
    type Envelope = AABB<[f32; 3]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.1)
    }
}

impl PointDistance for Entry {
    fn distance_2(&self, point: &[f32; 3]) -> f32 {
        let dx = self.1[0] - point[0];
        let dy = self.1[1] - point[1];
        let dz = self.1[2] - point[2];
        dx * dx + dy * dy + dz * dz
    }
}

/// Radius and k-nearest queries over a fixed point set.
pub struct SpatialIndex {
    tree: RTree<Entry>,
}

impl SpatialIndex {
    /// Index `positions`.  Non-finite points are skipped and never returned.
    pub fn build(positions: &[Point3]) -> Self {
        let entries = positions
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_finite())
            .map(|(i, p)| Entry(i, [p.x, p.y, p.z]))
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Index the positions of `cloud`; query results are cloud indices.
    pub fn from_cloud(cloud: &PointCloud) -> Self {
        Self::build(&cloud.positions().collect::<Vec<_>>())
    }

    /// Number of indexed (finite) points.
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Indices of every point within `radius` of `centre` (inclusive),
    /// in unspecified order.  The query point itself is included when it is
    /// part of the indexed set.
    pub fn radius_search(&self, centre: Point3, radius: f32) -> Vec<usize> {
        if radius < 0.0 || !centre.is_finite() {
            return Vec::new();
        }
        self.tree
            .locate_within_distance([centre.x, centre.y, centre.z], radius * radius)
            .map(|e| e.0)
            .collect()
    }

    /// Indices of the (at most) `k` points closest to `centre`, nearest
    /// first.  Equidistant points come back in unspecified order.
    pub fn nearest_k(&self, centre: Point3, k: usize) -> Vec<usize> {
        if k == 0 || !centre.is_finite() {
            return Vec::new();
        }
        self.tree
            .nearest_neighbor_iter(&[centre.x, centre.y, centre.z])
            .take(k)
            .map(|e| e.0)
            .collect()
    }
}
