//! Transform Frame (TF) Engine and point cloud re-expression.
//!
//! Maintains a graph of named reference frames and the 3-D rigid-body
//! transforms (translation + quaternion rotation) that relate them.  Given any
//! two frame names the engine composes a chain of transforms via BFS.  Every
//! registered edge can be walked in both directions, the reverse direction
//! using the inverse transform.
//!
//! The [`PoseProvider`] trait is the seam through which the pipeline asks for
//! transforms; [`SharedTfEngine`] is the thread-safe implementation that an
//! ingestion task can keep up to date while requests read from it.
//!
//! # Example
//!
//! ```rust
//! use tabletop_perception::transform::{TfEngine, Transform3D};
//! use tabletop_types::{Quaternion, Vec3};
//!
//! let mut tf = TfEngine::new();
//!
//! // The sensor mast sits 1 m above the base.
//! tf.set_transform("base_link", "mast",
//!     Transform3D::new(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity()));
//! // The camera is 0.2 m forward on the mast.
//! tf.set_transform("mast", "camera",
//!     Transform3D::new(Vec3::new(0.2, 0.0, 0.0), Quaternion::identity()));
//!
//! let t = tf.lookup("base_link", "camera").unwrap();
//! let p = t.apply(Vec3::new(0.0, 0.0, 0.5));
//! assert!((p.x - 0.2).abs() < 1e-5);
//! assert!((p.z - 1.5).abs() < 1e-5);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tabletop_types::{Point3, PointCloud, Quaternion, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation: rotation.normalized(),
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation + self.rotation.rotate(other.translation);
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// T_A_B → T_B_A.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        Self::new(-rotation.rotate(self.translation), rotation)
    }

    /// Map a point expressed in the child frame into the parent frame.
    pub fn apply(&self, p: Point3) -> Point3 {
        self.rotation.rotate(p) + self.translation
    }
}

/// Re-express `cloud` in `target_frame` using `transform` (= T_target_source).
///
/// Point count, order and grid layout are preserved; invalid points stay
/// invalid.
pub fn transform_cloud(cloud: &PointCloud, transform: &Transform3D, target_frame: &str) -> PointCloud {
    cloud.map_positions(target_frame, |p| transform.apply(p))
}

// ────────────────────────────────────────────────────────────────────────────
// PoseProvider
// ────────────────────────────────────────────────────────────────────────────

/// Resolves rigid transforms between named frames.
///
/// Implementations answer immediately; bounded waiting for a transform that
/// has not been published yet is the caller's responsibility.
pub trait PoseProvider: Send + Sync {
    /// The transform mapping points in `source_frame` into `target_frame` at
    /// `stamp`, or `None` when it cannot be resolved (yet).
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        stamp: DateTime<Utc>,
    ) -> Option<Transform3D>;
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named reference frames and the [`Transform3D`]s that relate
/// them.
///
/// Frames are identified by arbitrary string names (e.g. `"base_link"`,
/// `"head_rgbd_sensor"`).  Registering `"A" → "B"` also makes `"B" → "A"`
/// reachable through the inverse transform.  Transforms are static: the
/// engine keeps only the latest value per edge and ignores time stamps.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `edges[from][to] = T_from_to`
    edges: HashMap<String, HashMap<String, Transform3D>>,
}

impl TfEngine {
    /// Create an empty TF engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the pose of `child_frame` relative to
    /// `parent_frame` (T_parent_child).
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
        self.edges
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string(), transform.inverse());
    }

    /// Compute T_target_source: the transform that maps points expressed in
    /// `source_frame` into `target_frame`.
    ///
    /// Returns `None` if no path exists between the two frames.
    pub fn lookup(&self, target_frame: &str, source_frame: &str) -> Option<Transform3D> {
        if source_frame == target_frame {
            return Some(Transform3D::identity());
        }

        // BFS from the target; each queue item carries T_target_current.
        let mut queue: VecDeque<(String, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();

        queue.push_back((target_frame.to_string(), Transform3D::identity()));
        visited.insert(target_frame.to_string());

        while let Some((current, accumulated)) = queue.pop_front() {
            if let Some(neighbours) = self.edges.get(&current) {
                for (next, edge_tf) in neighbours {
                    if visited.contains(next) {
                        continue;
                    }
                    let composed = accumulated.compose(*edge_tf);
                    if next == source_frame {
                        return Some(composed);
                    }
                    visited.insert(next.clone());
                    queue.push_back((next.clone(), composed));
                }
            }
        }

        None
    }
}

impl PoseProvider for TfEngine {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        _stamp: DateTime<Utc>,
    ) -> Option<Transform3D> {
        self.lookup(target_frame, source_frame)
    }
}

/// A cloneable, lock-guarded [`TfEngine`].
///
/// Writers (a transform listener) and readers (pipeline requests) may live on
/// different threads.
#[derive(Debug, Clone, Default)]
pub struct SharedTfEngine(Arc<RwLock<TfEngine>>);

impl SharedTfEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_transform(&self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.0
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .set_transform(parent_frame, child_frame, transform);
    }
}

impl PoseProvider for SharedTfEngine {
    fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        _stamp: DateTime<Utc>,
    ) -> Option<Transform3D> {
        self.0
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .lookup(target_frame, source_frame)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
