//! Planar convex hull and polygonal prism extraction.
//!
//! A plane's boundary is the 2-D convex hull of its inliers projected into
//! the plane.  The prism over that boundary, bounded by a height band along
//! the plane normal, is the "tabletop region" in which objects are searched.

use tracing::debug;

use tabletop_types::{PerceptionError, Point3, PointCloud, Vec3};

/// An orthonormal frame attached to a plane: origin on the plane, `u` and
/// `v` spanning it, `n` its unit normal, with `u × v = n`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneFrame {
    pub origin: Point3,
    pub u: Vec3,
    pub v: Vec3,
    pub n: Vec3,
    d: f32,
}

impl PlaneFrame {
    /// Frame of the plane `ax + by + cz + d = 0`.  Returns `None` for a
    /// degenerate normal.
    pub fn from_coefficients(coefficients: [f32; 4]) -> Option<Self> {
        let [a, b, c, d] = coefficients;
        let raw = Vec3::new(a, b, c);
        let len = raw.norm();
        let n = raw.normalized()?;
        let d = d / len;

        // Seed `u` from the world axis least aligned with the normal.
        let seed = if n.x.abs() <= n.y.abs() && n.x.abs() <= n.z.abs() {
            Vec3::new(1.0, 0.0, 0.0)
        } else if n.y.abs() <= n.z.abs() {
            Vec3::new(0.0, 1.0, 0.0)
        } else {
            Vec3::unit_z()
        };
        let u = n.cross(seed).normalized()?;
        let v = n.cross(u);
        Some(Self {
            origin: n * -d,
            u,
            v,
            n,
            d,
        })
    }

    /// Signed distance of `p` from the plane, positive on the normal side.
    pub fn signed_distance(&self, p: Point3) -> f32 {
        self.n.dot(p) + self.d
    }

    /// In-plane coordinates of the orthogonal projection of `p`.
    pub fn to_plane(&self, p: Point3) -> (f64, f64) {
        let rel = p - self.origin;
        (f64::from(rel.dot(self.u)), f64::from(rel.dot(self.v)))
    }

    /// 3-D point on the plane at in-plane coordinates `(s, t)`.
    pub fn from_plane(&self, (s, t): (f64, f64)) -> Point3 {
        self.origin + self.u * s as f32 + self.v * t as f32
    }

    /// Orthogonal projection of `p` onto the plane.
    pub fn project(&self, p: Point3) -> Point3 {
        p - self.n * self.signed_distance(p)
    }
}

/// Convex boundary of the finite points of `cloud` projected onto the plane
/// `coefficients`.
///
/// Vertices lie on the plane, run counter-clockwise seen from the normal
/// side, and collinear points are dropped.  Fewer than three vertices come
/// back for degenerate input.
pub fn convex_hull(cloud: &PointCloud, coefficients: [f32; 4]) -> Vec<Point3> {
    let Some(frame) = PlaneFrame::from_coefficients(coefficients) else {
        return Vec::new();
    };
    let projected: Vec<(f64, f64)> = cloud
        .positions()
        .filter(|p| p.is_finite())
        .map(|p| frame.to_plane(p))
        .collect();
    monotone_chain(projected)
        .into_iter()
        .map(|q| frame.from_plane(q))
        .collect()
}

/// Andrew's monotone chain over 2-D points, counter-clockwise.
pub fn monotone_chain(mut pts: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    pts.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    pts.dedup();
    if pts.len() <= 2 {
        return pts;
    }

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }

    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }

    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

fn cross(o: (f64, f64), a: (f64, f64), b: (f64, f64)) -> f64 {
    (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
}

/// Ray-casting point-in-polygon test.  Boundary points may land either way;
/// combine with [`point_on_boundary`] when they must count as inside.
pub fn point_in_polygon(point: (f64, f64), polygon: &[(f64, f64)]) -> bool {
    if polygon.len() < 3 {
        return false;
    }

    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let pi = polygon[i];
        let pj = polygon[j];
        if ((pi.1 > point.1) != (pj.1 > point.1))
            && (point.0 < (pj.0 - pi.0) * (point.1 - pi.1) / (pj.1 - pi.1) + pi.0)
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// True when `point` lies on an edge of the closed polygon (within `eps`).
pub fn point_on_boundary(point: (f64, f64), polygon: &[(f64, f64)], eps: f64) -> bool {
    let n = polygon.len();
    (0..n).any(|i| {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        let (dx, dy) = (b.0 - a.0, b.1 - a.1);
        let len2 = dx * dx + dy * dy;
        let t = if len2 > 0.0 {
            (((point.0 - a.0) * dx + (point.1 - a.1) * dy) / len2).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let (ex, ey) = (point.0 - (a.0 + t * dx), point.1 - (a.1 + t * dy));
        ex * ex + ey * ey <= eps * eps
    })
}

/// Points this close to the outline (metres, in the plane) belong to the prism.
const OUTLINE_EPS: f64 = 1e-6;

/// Height band of a polygonal prism, in metres along the plane normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeightBand {
    pub low: f32,
    pub high: f32,
}

impl HeightBand {
    pub const fn new(low: f32, high: f32) -> Self {
        Self { low, high }
    }

    pub fn contains(&self, h: f32) -> bool {
        h >= self.low && h <= self.high
    }
}

/// Indices of the points of `cloud` inside the prism spanned by `polygon`
/// over the plane `coefficients` and bounded by `band`.  Points on the
/// outline itself are inside.
///
/// # Errors
///
/// [`PerceptionError::EmptyRegion`] when the prism holds no point.
pub fn prism_indices(
    cloud: &PointCloud,
    coefficients: [f32; 4],
    polygon: &[Point3],
    band: HeightBand,
) -> Result<Vec<usize>, PerceptionError> {
    let frame = PlaneFrame::from_coefficients(coefficients).ok_or(PerceptionError::EmptyRegion)?;
    let outline: Vec<(f64, f64)> = polygon.iter().map(|&p| frame.to_plane(p)).collect();

    let indices: Vec<usize> = cloud
        .positions()
        .enumerate()
        .filter(|(_, p)| {
            if !p.is_finite() || !band.contains(frame.signed_distance(*p)) {
                return false;
            }
            let q = frame.to_plane(*p);
            point_on_boundary(q, &outline, OUTLINE_EPS) || point_in_polygon(q, &outline)
        })
        .map(|(i, _)| i)
        .collect();

    debug!(
        input = cloud.len(),
        extracted = indices.len(),
        low = band.low,
        high = band.high,
        "polygonal prism extracted"
    );
    if indices.is_empty() {
        return Err(PerceptionError::EmptyRegion);
    }
    Ok(indices)
}

/// Points of `cloud` inside the prism; see [`prism_indices`].
pub fn extract_prism(
    cloud: &PointCloud,
    coefficients: [f32; 4],
    polygon: &[Point3],
    band: HeightBand,
) -> Result<PointCloud, PerceptionError> {
    prism_indices(cloud, coefficients, polygon, band).map(|indices| cloud.select(&indices))
}
