//! `tabletop-perception` – the geometric stages of the tabletop pipeline.
//!
//! Every stage is a synchronous, pure function over
//! [`PointCloud`][tabletop_types::PointCloud]s; the runtime crate chains them
//! per request.  Data-parallel inner loops use `rayon`.
//!
//! # Modules
//!
//! - [`transform`] – [`TfEngine`][transform::TfEngine]: graph of named frames
//!   and rigid transforms, plus the [`PoseProvider`][transform::PoseProvider]
//!   seam and cloud re-expression.
//! - [`filter`] – crop box and voxel-grid downsampling.
//! - [`outlier`] – radius outlier removal.
//! - [`segmentation`] – RANSAC single- and multi-plane segmentation.
//! - [`hull`] – planar convex hull and polygonal prism extraction.
//! - [`cluster`] – Euclidean cluster extraction.
//! - [`normals`] – k-nearest-neighbour normal estimation.
//! - [`descriptor`] – centroid, bounds, diameter and orientation of objects.
//! - [`selection`] – pixel, rectangle and contour selection on organized
//!   clouds.
//! - [`spatial`] – [`SpatialIndex`][spatial::SpatialIndex]: R*-tree radius and
//!   k-nearest queries.

pub mod cluster;
pub mod descriptor;
pub mod filter;
pub mod hull;
pub mod normals;
pub mod outlier;
pub mod segmentation;
pub mod selection;
pub mod spatial;
pub mod transform;
