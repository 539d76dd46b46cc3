//! Pixel-space selection on organized clouds.
//!
//! The image the operator looks at and the organized cloud share one pixel
//! grid, so a click, a drawn rectangle or a traced contour addresses points
//! directly.  Selected regions are cleaned with radius outlier removal before
//! they are described as objects.

use tracing::debug;

use tabletop_types::{OrganizedCloud, PerceptionError, Pixel, PixelRect, Point, Point3, PointCloud};

use crate::hull::{point_in_polygon, point_on_boundary};
use crate::outlier::{OutlierParams, remove_radius_outliers};

/// Position of the point at `pixel`.
///
/// # Errors
///
/// [`PerceptionError::InvalidPixel`] when the pixel lies outside the grid or
/// holds an invalid return.
pub fn point_at(cloud: &OrganizedCloud, pixel: Pixel) -> Result<Point3, PerceptionError> {
    cloud
        .at(pixel.col, pixel.row)
        .filter(|p| p.is_finite())
        .map(Point::position)
        .ok_or(PerceptionError::InvalidPixel {
            col: pixel.col,
            row: pixel.row,
        })
}

/// Pixels of the half-open rectangle, clamped to a `width × height` grid,
/// in row-major order.
pub fn pixels_in_rect(rect: PixelRect, width: usize, height: usize) -> Vec<Pixel> {
    let (x_end, y_end) = (rect.x_max.min(width), rect.y_max.min(height));
    (rect.y_min..y_end)
        .flat_map(|row| (rect.x_min..x_end).map(move |col| Pixel::new(col, row)))
        .collect()
}

/// Pixels inside or on the closed polygon traced by `contour`, clamped to a
/// `width × height` grid, in row-major order.
pub fn pixels_in_contour(contour: &[Pixel], width: usize, height: usize) -> Vec<Pixel> {
    if contour.is_empty() || width == 0 || height == 0 {
        return Vec::new();
    }
    let polygon: Vec<(f64, f64)> = contour
        .iter()
        .map(|p| (p.col as f64, p.row as f64))
        .collect();
    let col_min = contour.iter().map(|p| p.col).min().unwrap_or(0);
    let col_max = contour.iter().map(|p| p.col).max().unwrap_or(0).min(width - 1);
    let row_min = contour.iter().map(|p| p.row).min().unwrap_or(0);
    let row_max = contour.iter().map(|p| p.row).max().unwrap_or(0).min(height - 1);

    let mut pixels = Vec::new();
    for row in row_min..=row_max {
        for col in col_min..=col_max {
            let q = (col as f64, row as f64);
            if point_on_boundary(q, &polygon, 1e-9) || point_in_polygon(q, &polygon) {
                pixels.push(Pixel::new(col, row));
            }
        }
    }
    pixels
}

/// Unorganized cloud of the valid points at `pixels`.
pub fn select_pixels(cloud: &OrganizedCloud, pixels: &[Pixel]) -> PointCloud {
    let points: Vec<Point> = pixels
        .iter()
        .filter_map(|px| cloud.at(px.col, px.row))
        .filter(|p| p.is_finite())
        .copied()
        .collect();
    cloud.as_cloud().derive(points)
}

/// Valid points inside `rect`, denoised.
///
/// # Errors
///
/// [`PerceptionError::EmptyCloud`] when nothing survives.
pub fn select_rect(
    cloud: &OrganizedCloud,
    rect: PixelRect,
    outliers: OutlierParams,
) -> Result<PointCloud, PerceptionError> {
    let pixels = pixels_in_rect(rect, cloud.width(), cloud.height());
    denoise(select_pixels(cloud, &pixels), outliers, "bounding box selection")
}

/// Valid points inside `contour`, denoised.
///
/// # Errors
///
/// [`PerceptionError::EmptyCloud`] when nothing survives.
pub fn select_contour(
    cloud: &OrganizedCloud,
    contour: &[Pixel],
    outliers: OutlierParams,
) -> Result<PointCloud, PerceptionError> {
    let pixels = pixels_in_contour(contour, cloud.width(), cloud.height());
    denoise(select_pixels(cloud, &pixels), outliers, "contour selection")
}

fn denoise(
    selected: PointCloud,
    outliers: OutlierParams,
    stage: &str,
) -> Result<PointCloud, PerceptionError> {
    let kept = remove_radius_outliers(&selected, outliers);
    debug!(stage, selected = selected.len(), kept = kept.len(), "selection denoised");
    if kept.is_empty() {
        return Err(PerceptionError::EmptyCloud {
            stage: stage.to_string(),
        });
    }
    Ok(kept)
}
