//! Scene description produced by the pipeline: planes and objects.

use serde::{Deserialize, Serialize};

use crate::cloud::PointCloud;
use crate::geometry::{Point3, Quaternion, Vec3};

/// Half-width of the unit-alignment bands used by [`PlaneAxis::classify`].
const ALIGNMENT_BAND: f32 = 0.1;

/// Coarse orientation label of a plane, derived from its normal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaneAxis {
    /// Normal along world X (a wall facing the robot).
    X,
    /// Normal along world Y.
    Y,
    /// Normal along world Z (a table or floor).
    Z,
    Unaligned,
}

impl PlaneAxis {
    /// Label a plane normal.  A component counts as "one" when its magnitude
    /// lies strictly inside `(0.9, 1.1)` and as "zero" when it is below `0.1`;
    /// anything else is [`PlaneAxis::Unaligned`].
    pub fn classify(normal: Vec3) -> Self {
        let (a, b, c) = (normal.x.abs(), normal.y.abs(), normal.z.abs());
        let one = |v: f32| v > 1.0 - ALIGNMENT_BAND && v < 1.0 + ALIGNMENT_BAND;
        let zero = |v: f32| v < ALIGNMENT_BAND;
        if one(a) && zero(b) && zero(c) {
            PlaneAxis::X
        } else if zero(a) && one(b) && zero(c) {
            PlaneAxis::Y
        } else if zero(a) && zero(b) && one(c) {
            PlaneAxis::Z
        } else {
            PlaneAxis::Unaligned
        }
    }
}

impl std::fmt::Display for PlaneAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaneAxis::X => write!(f, "x"),
            PlaneAxis::Y => write!(f, "y"),
            PlaneAxis::Z => write!(f, "z"),
            PlaneAxis::Unaligned => write!(f, "unaligned"),
        }
    }
}

/// A segmented planar surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    /// `[a, b, c, d]` of `ax + by + cz + d = 0`, with `(a, b, c)` a unit normal.
    pub coefficients: [f32; 4],
    /// Inlier points.
    pub cloud: PointCloud,
    /// Closed convex boundary, counter-clockwise seen from the normal side.
    /// The first vertex is not repeated at the end.
    pub polygon: Vec<Point3>,
    pub center: Point3,
    pub min: Point3,
    pub max: Point3,
    pub axis: PlaneAxis,
}

impl Plane {
    pub fn normal(&self) -> Vec3 {
        let [a, b, c, _] = self.coefficients;
        Vec3::new(a, b, c)
    }

    /// Signed distance of `p` from the plane, positive on the normal side.
    pub fn signed_distance(&self, p: Point3) -> f32 {
        self.normal().dot(p) + self.coefficients[3]
    }

    /// Number of inlier points.
    pub fn size(&self) -> usize {
        self.cloud.len()
    }
}

/// A physical object found on (or selected from) the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub cloud: PointCloud,
    pub center: Point3,
    pub min: Point3,
    pub max: Point3,
    /// Endpoints of the object's diameter segment (its two farthest points).
    pub segment: [Point3; 2],
    pub orientation: Quaternion,
    /// One unit normal per point of `cloud`, when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normals: Option<Vec<Vec3>>,
}

impl DetectedObject {
    /// Extent of the axis-aligned bounding box along each axis.
    pub fn dimensions(&self) -> Vec3 {
        self.max - self.min
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_unit_axes() {
        assert_eq!(PlaneAxis::classify(Vec3::new(1.0, 0.0, 0.0)), PlaneAxis::X);
        assert_eq!(PlaneAxis::classify(Vec3::new(0.0, 1.0, 0.0)), PlaneAxis::Y);
        assert_eq!(PlaneAxis::classify(Vec3::new(0.0, 0.0, 1.0)), PlaneAxis::Z);
    }

    #[test]
    fn classify_ignores_sign() {
        assert_eq!(PlaneAxis::classify(Vec3::new(0.0, 0.0, -1.0)), PlaneAxis::Z);
        assert_eq!(PlaneAxis::classify(Vec3::new(-0.98, 0.05, 0.0)), PlaneAxis::X);
    }

    #[test]
    fn classify_diagonal_is_unaligned() {
        assert_eq!(
            PlaneAxis::classify(Vec3::new(0.57, 0.57, 0.57)),
            PlaneAxis::Unaligned
        );
    }

    #[test]
    fn classify_out_of_band_is_unaligned() {
        // 0.1 is outside the "zero" band, 0.9 outside the "one" band.
        assert_eq!(PlaneAxis::classify(Vec3::new(0.1, 0.0, 0.995)), PlaneAxis::Unaligned);
        assert_eq!(PlaneAxis::classify(Vec3::new(0.0, 0.0, 0.9)), PlaneAxis::Unaligned);
    }

    #[test]
    fn plane_axis_serializes_lowercase() {
        let json = serde_json::to_string(&PlaneAxis::Unaligned).unwrap();
        assert_eq!(json, "\"unaligned\"");
    }

    #[test]
    fn signed_distance_is_positive_above() {
        let plane = Plane {
            coefficients: [0.0, 0.0, 1.0, -0.5],
            cloud: PointCloud::unorganized("map", Vec::new()),
            polygon: Vec::new(),
            center: Vec3::new(0.0, 0.0, 0.5),
            min: Vec3::zero(),
            max: Vec3::zero(),
            axis: PlaneAxis::Z,
        };
        assert!((plane.signed_distance(Vec3::new(3.0, -1.0, 0.7)) - 0.2).abs() < 1e-6);
        assert!(plane.signed_distance(Vec3::new(0.0, 0.0, 0.4)) < 0.0);
    }
}
