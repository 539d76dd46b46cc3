//! RANSAC plane segmentation.
//!
//! [`segment_plane`] finds the dominant plane of a cloud; [`segment_planes`]
//! peels planes off one after another until the residual no longer holds a
//! plane of the requested size.
//!
//! Hypotheses are drawn serially from a [`StdRng`] and scored in parallel.
//! The winning hypothesis is the one with the most inliers, ties going to the
//! earliest drawn, so a seeded run is reproducible regardless of how rayon
//! schedules the scoring.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::{debug, info};

use tabletop_types::{PerceptionError, Plane, PlaneAxis, Point3, PointCloud, Vec3};

use crate::hull;

/// Below this magnitude a normal component counts as zero when choosing the
/// canonical normal sign.
const SIGN_EPS: f32 = 1e-6;

/// Parameters of a single RANSAC run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RansacParams {
    /// Maximum point-to-plane distance of an inlier (metres).
    pub distance_threshold: f32,
    /// Number of 3-point hypotheses drawn.
    pub max_iterations: usize,
    /// When set, only planes whose normal lies within `eps_angle_deg` of this
    /// axis (either sign) are accepted.
    pub axis: Option<Vec3>,
    pub eps_angle_deg: f32,
    /// Fixed RNG seed; `None` seeds from entropy.
    pub seed: Option<u64>,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            distance_threshold: 0.01,
            max_iterations: 200,
            axis: None,
            eps_angle_deg: 5.0,
            seed: None,
        }
    }
}

/// The dominant plane of a cloud together with the partition it induces.
#[derive(Debug, Clone)]
pub struct PlaneSegmentation {
    pub plane: Plane,
    /// Indices of the inliers in the input cloud, ascending.
    pub inliers: Vec<usize>,
    /// Every finite input point that is not an inlier.
    pub remainder: PointCloud,
}

/// Fit the dominant plane of `cloud`.
///
/// The best RANSAC hypothesis is refined by a least-squares fit to all of its
/// inliers and the inlier set is re-selected against the refined model.  The
/// normal is made to point up (+Z); for vertical planes its first non-zero
/// component is made positive instead.
///
/// # Errors
///
/// [`PerceptionError::NoPlaneFound`] when the cloud has fewer than three
/// finite points or no hypothesis collects an inlier.
pub fn segment_plane(
    cloud: &PointCloud,
    params: &RansacParams,
) -> Result<PlaneSegmentation, PerceptionError> {
    let finite: Vec<(usize, Point3)> = cloud
        .positions()
        .enumerate()
        .filter(|(_, p)| p.is_finite())
        .collect();
    if finite.len() < 3 {
        return Err(PerceptionError::NoPlaneFound);
    }

    let hypotheses = draw_hypotheses(&finite, params);
    let threshold = params.distance_threshold;
    let best = hypotheses
        .par_iter()
        .enumerate()
        .map(|(order, model)| {
            let count = finite
                .iter()
                .filter(|(_, p)| point_plane_distance(*model, *p) <= threshold)
                .count();
            (count, order)
        })
        .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)));

    let Some((count, order)) = best.filter(|(count, _)| *count > 0) else {
        debug!(hypotheses = hypotheses.len(), "no plane hypothesis with inliers");
        return Err(PerceptionError::NoPlaneFound);
    };
    let coarse = hypotheses[order];
    let mut model = coarse;
    let mut inliers = select_inliers(&finite, coarse, threshold);
    if let Some(refined) = fit_plane(inliers.iter().map(|&i| cloud.points()[i].position()))
        .filter(|m| satisfies_axis(*m, params))
    {
        let reselected = select_inliers(&finite, refined, threshold);
        if !reselected.is_empty() {
            model = refined;
            inliers = reselected;
        }
    }
    let model = canonicalize(model);

    debug!(
        hypotheses = hypotheses.len(),
        coarse_inliers = count,
        inliers = inliers.len(),
        "plane model refined"
    );

    let inlier_cloud = cloud.select(&inliers);
    let remainder = {
        let finite_indices: Vec<usize> = finite.iter().map(|(i, _)| *i).collect();
        let outliers = difference(&finite_indices, &inliers);
        cloud.select(&outliers)
    };
    let plane = build_plane(inlier_cloud, model);

    info!(
        a = model[0],
        b = model[1],
        c = model[2],
        d = model[3],
        inliers = inliers.len(),
        axis = %plane.axis,
        "plane segmented"
    );

    Ok(PlaneSegmentation {
        plane,
        inliers,
        remainder,
    })
}

/// Planes peeled off a cloud, plus what is left of it.
#[derive(Debug, Clone)]
pub struct MultiPlaneSegmentation {
    pub planes: Vec<Plane>,
    /// Finite points that belong to none of `planes`.
    pub residual: PointCloud,
}

/// Repeatedly segment the residual cloud, accepting planes of at least
/// `min_plane_size` inliers.
///
/// Stops when no plane is found, when the next plane is too small, or after
/// `len / min_plane_size` rounds.  With a fixed seed, round `k` uses
/// `seed + k`.  Accepting no plane at all is not an error here; see
/// [`segment_planes`].
pub fn peel_planes(
    cloud: &PointCloud,
    params: &RansacParams,
    min_plane_size: usize,
) -> MultiPlaneSegmentation {
    let min_plane_size = min_plane_size.max(1);
    let mut residual = cloud.derive(cloud.iter().filter(|p| p.is_finite()).copied().collect());
    let rounds = residual.len() / min_plane_size;
    let mut planes = Vec::new();

    for round in 0..rounds {
        let round_params = RansacParams {
            seed: params.seed.map(|s| s.wrapping_add(round as u64)),
            ..*params
        };
        let Ok(segmentation) = segment_plane(&residual, &round_params) else {
            break;
        };
        if segmentation.plane.size() < min_plane_size {
            debug!(
                size = segmentation.plane.size(),
                min_plane_size, "next plane below minimum size"
            );
            break;
        }
        planes.push(segmentation.plane);
        residual = segmentation.remainder;
        if residual.len() < min_plane_size {
            break;
        }
    }

    info!(planes = planes.len(), residual = residual.len(), "multi-plane segmentation done");
    MultiPlaneSegmentation { planes, residual }
}

/// [`peel_planes`], keeping only the planes.
///
/// # Errors
///
/// [`PerceptionError::NoPlaneFound`] when not a single plane is accepted.
pub fn segment_planes(
    cloud: &PointCloud,
    params: &RansacParams,
    min_plane_size: usize,
) -> Result<Vec<Plane>, PerceptionError> {
    let planes = peel_planes(cloud, params, min_plane_size).planes;
    if planes.is_empty() {
        return Err(PerceptionError::NoPlaneFound);
    }
    Ok(planes)
}

/// Orthogonally project every finite point of `cloud` onto the plane
/// `coefficients`.  Invalid points are passed through; layout is kept.
pub fn project_onto_plane(cloud: &PointCloud, coefficients: [f32; 4]) -> PointCloud {
    match hull::PlaneFrame::from_coefficients(coefficients) {
        Some(frame) => cloud.map_positions(cloud.frame_id.clone(), |p| frame.project(p)),
        None => cloud.clone(),
    }
}

/// Assemble a [`Plane`] from its inliers and (unit-normal) coefficients.
pub fn build_plane(inliers: PointCloud, coefficients: [f32; 4]) -> Plane {
    let polygon = hull::convex_hull(&inliers, coefficients);
    let center = inliers.centroid().unwrap_or_default();
    let (min, max) = inliers.bounds().unwrap_or_default();
    let axis = PlaneAxis::classify(Vec3::new(coefficients[0], coefficients[1], coefficients[2]));
    Plane {
        coefficients,
        cloud: inliers,
        polygon,
        center,
        min,
        max,
        axis,
    }
}

/// Least-squares plane through a point set (unit normal), or `None` when the
/// set is empty or its spread does not define a plane.
pub fn fit_plane(points: impl Iterator<Item = Point3>) -> Option<[f32; 4]> {
    let pts: Vec<Vector3<f64>> = points
        .map(|p| Vector3::new(f64::from(p.x), f64::from(p.y), f64::from(p.z)))
        .collect();
    if pts.len() < 3 {
        return None;
    }
    let centroid = pts.iter().fold(Vector3::zeros(), |acc, p| acc + p) / pts.len() as f64;
    let mut cov = Matrix3::<f64>::zeros();
    for p in &pts {
        let d = p - centroid;
        cov += d * d.transpose();
    }

    let eigen = SymmetricEigen::new(cov);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))?;
    let normal = eigen.eigenvectors.column(min_idx).into_owned();
    let len = normal.norm();
    if !(len > 0.0 && len.is_finite()) {
        return None;
    }
    let normal = normal / len;
    let d = -normal.dot(&centroid);
    Some([normal.x as f32, normal.y as f32, normal.z as f32, d as f32])
}

fn draw_hypotheses(finite: &[(usize, Point3)], params: &RansacParams) -> Vec<[f32; 4]> {
    let mut rng = match params.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut hypotheses = Vec::with_capacity(params.max_iterations);
    for _ in 0..params.max_iterations {
        let sample = index::sample(&mut rng, finite.len(), 3);
        let (a, b, c) = (finite[sample.index(0)].1, finite[sample.index(1)].1, finite[sample.index(2)].1);
        // Collinear or coincident samples span no plane.
        let Some(normal) = (b - a).cross(c - a).normalized() else {
            continue;
        };
        let model = [normal.x, normal.y, normal.z, -normal.dot(a)];
        if satisfies_axis(model, params) {
            hypotheses.push(model);
        }
    }
    hypotheses
}

fn satisfies_axis(model: [f32; 4], params: &RansacParams) -> bool {
    let Some(axis) = params.axis.and_then(Vec3::normalized) else {
        return true;
    };
    let normal = Vec3::new(model[0], model[1], model[2]);
    normal.dot(axis).abs() >= params.eps_angle_deg.to_radians().cos()
}

fn point_plane_distance(model: [f32; 4], p: Point3) -> f32 {
    (model[0] * p.x + model[1] * p.y + model[2] * p.z + model[3]).abs()
}

fn select_inliers(finite: &[(usize, Point3)], model: [f32; 4], threshold: f32) -> Vec<usize> {
    finite
        .iter()
        .filter(|(_, p)| point_plane_distance(model, *p) <= threshold)
        .map(|(i, _)| *i)
        .collect()
}

fn canonicalize(model: [f32; 4]) -> [f32; 4] {
    let [a, b, c, _] = model;
    let flip = if c.abs() > SIGN_EPS {
        c < 0.0
    } else if a.abs() > SIGN_EPS {
        a < 0.0
    } else {
        b < 0.0
    };
    if flip { model.map(|v| -v) } else { model }
}

/// Elements of the ascending `all` that are not in the ascending `remove`.
fn difference(all: &[usize], remove: &[usize]) -> Vec<usize> {
    let mut out = Vec::with_capacity(all.len().saturating_sub(remove.len()));
    let mut r = remove.iter().peekable();
    for &i in all {
        while r.peek().is_some_and(|&&x| x < i) {
            r.next();
        }
        if r.peek() != Some(&&i) {
            out.push(i);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(distance_threshold: f32) -> RansacParams {
        RansacParams {
            distance_threshold,
            seed: Some(42),
            ..RansacParams::default()
        }
    }

    /// `nx × ny` grid on z = `z`, 2 cm spacing, centred on the origin.
    fn table(nx: usize, ny: usize, z: f32) -> Vec<Point3> {
        let mut pts = Vec::new();
        for i in 0..nx {
            for j in 0..ny {
                pts.push(Vec3::new(
                    (i as f32 - (nx - 1) as f32 / 2.0) * 0.02,
                    (j as f32 - (ny - 1) as f32 / 2.0) * 0.02,
                    z,
                ));
            }
        }
        pts
    }

    /// `ny × nz` grid on x = `x`, 2 cm spacing, z from 0.1 upwards.
    fn wall(ny: usize, nz: usize, x: f32) -> Vec<Point3> {
        let mut pts = Vec::new();
        for j in 0..ny {
            for k in 0..nz {
                pts.push(Vec3::new(x, j as f32 * 0.02 - 0.2, 0.1 + k as f32 * 0.02));
            }
        }
        pts
    }

    #[test]
    fn finds_horizontal_plane_with_up_normal() {
        let mut pts = table(20, 20, 0.5);
        pts.push(Vec3::new(0.0, 0.0, 0.9));
        pts.push(Vec3::new(0.1, 0.1, 1.2));
        let cloud = PointCloud::from_positions("base_link", pts);

        let seg = segment_plane(&cloud, &seeded(0.01)).unwrap();
        assert_eq!(seg.inliers.len(), 400);
        assert_eq!(seg.remainder.len(), 2);
        assert!(seg.plane.normal().z > 0.999);
        assert!((seg.plane.coefficients[3] + 0.5).abs() < 1e-4);
        assert_eq!(seg.plane.axis, PlaneAxis::Z);
        assert!(seg.plane.center.x.abs() < 1e-4);
        assert!(seg.plane.polygon.len() >= 4);
    }

    #[test]
    fn too_few_points_is_no_plane() {
        let cloud = PointCloud::from_positions("base_link", [Vec3::zero(), Vec3::unit_z()]);
        assert_eq!(
            segment_plane(&cloud, &seeded(0.01)).unwrap_err(),
            PerceptionError::NoPlaneFound
        );
    }

    #[test]
    fn collinear_points_are_no_plane() {
        let cloud = PointCloud::from_positions(
            "base_link",
            (0..10).map(|i| Vec3::new(i as f32, 0.0, 0.0)),
        );
        assert_eq!(
            segment_plane(&cloud, &seeded(0.01)).unwrap_err(),
            PerceptionError::NoPlaneFound
        );
    }

    #[test]
    fn seeded_runs_are_reproducible() {
        let mut pts = table(15, 15, 0.0);
        pts.extend(wall(10, 10, 1.0));
        let cloud = PointCloud::from_positions("base_link", pts);
        let a = segment_plane(&cloud, &seeded(0.01)).unwrap();
        let b = segment_plane(&cloud, &seeded(0.01)).unwrap();
        assert_eq!(a.inliers, b.inliers);
        assert_eq!(a.plane.coefficients, b.plane.coefficients);
    }

    #[test]
    fn axis_constraint_skips_the_larger_wall() {
        let mut pts = wall(25, 20, 1.0);
        pts.extend(table(12, 12, 0.0));
        let cloud = PointCloud::from_positions("base_link", pts);
        let params = RansacParams {
            axis: Some(Vec3::unit_z()),
            eps_angle_deg: 5.0,
            ..seeded(0.01)
        };
        let seg = segment_plane(&cloud, &params).unwrap();
        assert_eq!(seg.plane.axis, PlaneAxis::Z);
        assert_eq!(seg.inliers.len(), 144);
    }

    #[test]
    fn vertical_plane_normal_has_positive_x() {
        let cloud = PointCloud::from_positions("base_link", wall(10, 10, 2.0));
        let seg = segment_plane(&cloud, &seeded(0.01)).unwrap();
        assert!(seg.plane.normal().x > 0.999);
        assert_eq!(seg.plane.axis, PlaneAxis::X);
    }

    #[test]
    fn multi_plane_recovers_table_and_wall() {
        let mut pts = table(20, 20, 0.0);
        pts.extend(wall(20, 20, 2.0));
        let cloud = PointCloud::from_positions("base_link", pts);
        let params = seeded(0.02);

        let planes = segment_planes(&cloud, &params, 100).unwrap();
        assert_eq!(planes.len(), 2);
        let mut axes: Vec<PlaneAxis> = planes.iter().map(|p| p.axis).collect();
        axes.sort_by_key(|a| a.to_string());
        assert_eq!(axes, vec![PlaneAxis::X, PlaneAxis::Z]);
    }

    #[test]
    fn multi_plane_drops_plane_below_minimum() {
        let mut pts = table(20, 20, 0.0);
        pts.extend(wall(5, 10, 2.0));
        let cloud = PointCloud::from_positions("base_link", pts);

        let planes = segment_planes(&cloud, &seeded(0.02), 100).unwrap();
        assert_eq!(planes.len(), 1);
        assert_eq!(planes[0].axis, PlaneAxis::Z);
    }

    #[test]
    fn peel_planes_leaves_the_residual() {
        let mut pts = table(20, 20, 0.0);
        pts.push(Vec3::new(0.0, 0.0, 0.5));
        pts.push(Vec3::new(0.1, 0.0, 0.7));
        let cloud = PointCloud::from_positions("base_link", pts);

        let peeled = peel_planes(&cloud, &seeded(0.02), 100);
        assert_eq!(peeled.planes.len(), 1);
        assert_eq!(peeled.residual.len(), 2);
    }

    #[test]
    fn peel_rounds_are_capped_by_minimum_size() {
        // Three stacked layers of exactly `min_plane_size` points each.
        let mut pts = table(10, 10, 0.0);
        pts.extend(table(10, 10, 0.5));
        pts.extend(table(10, 10, 1.0));
        let cloud = PointCloud::from_positions("base_link", pts);
        let min_plane_size = 100;

        let peeled = peel_planes(&cloud, &seeded(0.02), min_plane_size);
        assert!(peeled.planes.len() <= cloud.len() / min_plane_size);
        assert_eq!(peeled.planes.len(), 3);
        assert!(peeled.planes.iter().all(|p| p.size() == min_plane_size));
        assert!(peeled.residual.is_empty());

        // Every layer is below this minimum, so none is accepted.
        let peeled = peel_planes(&cloud, &seeded(0.02), 101);
        assert!(peeled.planes.len() <= cloud.len() / 101);
        assert!(peeled.planes.is_empty());
    }

    #[test]
    fn multi_plane_without_any_plane_fails() {
        let cloud = PointCloud::from_positions("base_link", table(5, 5, 0.0));
        assert_eq!(
            segment_planes(&cloud, &seeded(0.02), 100).unwrap_err(),
            PerceptionError::NoPlaneFound
        );
    }

    #[test]
    fn fit_plane_recovers_tilted_plane() {
        let pts = (0..10).flat_map(|i| {
            (0..10).map(move |j| {
                let (x, y) = (i as f32 * 0.1, j as f32 * 0.1);
                Vec3::new(x, y, 0.5 * x)
            })
        });
        let m = canonicalize(fit_plane(pts).unwrap());
        let n = Vec3::new(m[0], m[1], m[2]);
        let expected = Vec3::new(-0.5, 0.0, 1.0).normalized().unwrap();
        assert!((n - expected).norm() < 1e-4);
    }

    #[test]
    fn project_onto_plane_flattens_points() {
        let cloud = PointCloud::from_positions(
            "base_link",
            [Vec3::new(0.3, 0.2, 0.7), Vec3::new(-1.0, 0.0, -0.2)],
        );
        let flat = project_onto_plane(&cloud, [0.0, 0.0, 1.0, -0.1]);
        assert!(flat.iter().all(|p| (p.z - 0.1).abs() < 1e-6));
        assert!((flat.points()[0].x - 0.3).abs() < 1e-6);
    }

    #[test]
    fn difference_of_sorted_lists() {
        assert_eq!(difference(&[0, 1, 2, 3, 5], &[1, 3, 4]), vec![0, 2, 5]);
    }
}
