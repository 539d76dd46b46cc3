//! Point cloud containers.
//!
//! A [`PointCloud`] follows the layout convention of depth-sensor messages:
//! `width × height == len`, and `height == 1` marks an *unorganized* cloud.
//! An *organized* cloud keeps the sensor's row-major pixel grid, with invalid
//! returns stored as non-finite coordinates.  Pixel addressing is only
//! available through the checked [`OrganizedCloud`] wrapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PerceptionError;
use crate::geometry::{Point3, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Point
// ────────────────────────────────────────────────────────────────────────────

/// A single sensor return: position plus optional RGB color.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rgb: Option<[u8; 3]>,
}

impl Point {
    /// A colorless point.
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z, rgb: None }
    }

    pub const fn with_rgb(x: f32, y: f32, z: f32, rgb: [u8; 3]) -> Self {
        Self { x, y, z, rgb: Some(rgb) }
    }

    /// An invalid return (no range measured at this pixel).
    pub const fn invalid() -> Self {
        Self::new(f32::NAN, f32::NAN, f32::NAN)
    }

    pub fn position(&self) -> Point3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Same color, new position.
    pub fn moved_to(&self, p: Point3) -> Self {
        Self { x: p.x, y: p.y, z: p.z, rgb: self.rgb }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl From<Point3> for Point {
    fn from(p: Point3) -> Self {
        Self::new(p.x, p.y, p.z)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// PointCloud
// ────────────────────────────────────────────────────────────────────────────

/// An ordered set of points expressed in the reference frame `frame_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPointCloud")]
pub struct PointCloud {
    /// Reference frame the coordinates are expressed in, e.g. `"base_link"`.
    pub frame_id: String,
    /// Acquisition time of the originating sensor frame.
    pub stamp: DateTime<Utc>,
    width: usize,
    height: usize,
    points: Vec<Point>,
}

impl PointCloud {
    /// Create an unorganized cloud stamped with the current time.
    pub fn unorganized(frame_id: impl Into<String>, points: Vec<Point>) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp: Utc::now(),
            width: points.len(),
            height: 1,
            points,
        }
    }

    /// Create an organized cloud with a `width × height` row-major grid.
    ///
    /// # Errors
    ///
    /// Returns [`PerceptionError::InvalidCloud`] when the number of points does
    /// not match the grid.
    pub fn organized(
        frame_id: impl Into<String>,
        width: usize,
        height: usize,
        points: Vec<Point>,
    ) -> Result<Self, PerceptionError> {
        check_grid(width, height, points.len())?;
        Ok(Self {
            frame_id: frame_id.into(),
            stamp: Utc::now(),
            width,
            height,
            points,
        })
    }

    /// Build an unorganized, colorless cloud from bare positions.
    pub fn from_positions(
        frame_id: impl Into<String>,
        positions: impl IntoIterator<Item = Point3>,
    ) -> Self {
        Self::unorganized(frame_id, positions.into_iter().map(Point::from).collect())
    }

    /// Unorganized cloud with this cloud's header and the given points.
    pub fn derive(&self, points: Vec<Point>) -> Self {
        Self {
            frame_id: self.frame_id.clone(),
            stamp: self.stamp,
            width: points.len(),
            height: 1,
            points,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn is_organized(&self) -> bool {
        self.height > 1
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Point> {
        self.points.iter()
    }

    /// Point positions, in cloud order.
    pub fn positions(&self) -> impl Iterator<Item = Point3> + '_ {
        self.points.iter().map(Point::position)
    }

    /// Unorganized cloud holding the points at `indices`, in the given order.
    ///
    /// Out-of-range indices are skipped.
    pub fn select(&self, indices: &[usize]) -> Self {
        self.derive(
            indices
                .iter()
                .filter_map(|&i| self.points.get(i).copied())
                .collect(),
        )
    }

    /// Map every position into `frame_id`, preserving count, order and grid.
    ///
    /// Non-finite points are passed through untouched so that invalid pixels
    /// stay invalid.
    pub fn map_positions(&self, frame_id: impl Into<String>, f: impl Fn(Point3) -> Point3) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp: self.stamp,
            width: self.width,
            height: self.height,
            points: self
                .points
                .iter()
                .map(|p| if p.is_finite() { p.moved_to(f(p.position())) } else { *p })
                .collect(),
        }
    }

    /// Mean position of the finite points, or `None` when there are none.
    pub fn centroid(&self) -> Option<Point3> {
        let mut sum = [0.0f64; 3];
        let mut count = 0usize;
        for p in self.points.iter().filter(|p| p.is_finite()) {
            sum[0] += f64::from(p.x);
            sum[1] += f64::from(p.y);
            sum[2] += f64::from(p.z);
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(Vec3::new(
            (sum[0] / n) as f32,
            (sum[1] / n) as f32,
            (sum[2] / n) as f32,
        ))
    }

    /// Axis-aligned `(min, max)` corners of the finite points.
    pub fn bounds(&self) -> Option<(Point3, Point3)> {
        self.points
            .iter()
            .filter(|p| p.is_finite())
            .map(Point::position)
            .fold(None, |acc, p| match acc {
                None => Some((p, p)),
                Some((lo, hi)) => Some((lo.min(p), hi.max(p))),
            })
    }
}

/// `width × height` must hold exactly `len` points, with at least one row.
fn check_grid(width: usize, height: usize, len: usize) -> Result<(), PerceptionError> {
    if height == 0 || width.checked_mul(height) != Some(len) {
        return Err(PerceptionError::InvalidCloud {
            reason: format!("grid {width}x{height} does not match {len} points"),
        });
    }
    Ok(())
}

/// Wire form of [`PointCloud`], validated before it becomes one.
#[derive(Deserialize)]
struct RawPointCloud {
    frame_id: String,
    stamp: DateTime<Utc>,
    width: usize,
    height: usize,
    points: Vec<Point>,
}

impl TryFrom<RawPointCloud> for PointCloud {
    type Error = PerceptionError;

    fn try_from(raw: RawPointCloud) -> Result<Self, Self::Error> {
        check_grid(raw.width, raw.height, raw.points.len())?;
        Ok(Self {
            frame_id: raw.frame_id,
            stamp: raw.stamp,
            width: raw.width,
            height: raw.height,
            points: raw.points,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OrganizedCloud
// ────────────────────────────────────────────────────────────────────────────

/// A [`PointCloud`] that is guaranteed to carry a pixel grid.
#[derive(Debug, Clone, PartialEq)]
pub struct OrganizedCloud(PointCloud);

impl TryFrom<PointCloud> for OrganizedCloud {
    type Error = PerceptionError;

    fn try_from(cloud: PointCloud) -> Result<Self, Self::Error> {
        if !cloud.is_organized() {
            return Err(PerceptionError::InvalidCloud {
                reason: "pixel lookup requires an organized cloud".to_string(),
            });
        }
        Ok(Self(cloud))
    }
}

impl OrganizedCloud {
    pub fn width(&self) -> usize {
        self.0.width
    }

    pub fn height(&self) -> usize {
        self.0.height
    }

    /// The point at pixel (`col`, `row`), `None` outside the grid.
    ///
    /// The returned point may still be invalid (non-finite).
    pub fn at(&self, col: usize, row: usize) -> Option<&Point> {
        if col >= self.0.width || row >= self.0.height {
            return None;
        }
        self.0.points.get(row * self.0.width + col)
    }

    pub fn as_cloud(&self) -> &PointCloud {
        &self.0
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Pixel addressing
// ────────────────────────────────────────────────────────────────────────────

/// A pixel coordinate in an organized cloud.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pixel {
    pub col: usize,
    pub row: usize,
}

impl Pixel {
    pub const fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }
}

/// A half-open pixel rectangle `[x_min, x_max) × [y_min, y_max)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x_min: usize,
    pub y_min: usize,
    pub x_max: usize,
    pub y_max: usize,
}

impl PixelRect {
    pub const fn new(x_min: usize, y_min: usize, x_max: usize, y_max: usize) -> Self {
        Self { x_min, y_min, x_max, y_max }
    }
}
