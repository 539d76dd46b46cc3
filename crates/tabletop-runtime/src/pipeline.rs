//! [`TabletopPipeline`] – the request/response façade over the perception
//! stages.
//!
//! Every operation is one full invocation: acquire the latest frame in the
//! fixed frame, then run the CPU stages on a blocking worker.  At most one
//! invocation is in flight per pipeline; later callers queue on an async
//! mutex.  A failing stage aborts the invocation and nothing partial is
//! returned.
//!
//! | Operation | Stages |
//! |---|---|
//! | [`segment_single_plane`][TabletopPipeline::segment_single_plane] | transform → filter → RANSAC |
//! | [`segment_multiple_planes`][TabletopPipeline::segment_multiple_planes] | transform → filter → iterative RANSAC |
//! | [`extract_tabletop_region`][TabletopPipeline::extract_tabletop_region] | … → RANSAC → hull → prism |
//! | [`cluster_tabletop_objects`][TabletopPipeline::cluster_tabletop_objects] | … → prism → clustering → descriptors |
//! | [`point_at`][TabletopPipeline::point_at] | transform → pixel lookup |
//! | [`object_from_bounding_box`][TabletopPipeline::object_from_bounding_box] | transform → rectangle → outliers → descriptor |
//! | [`object_from_contour`][TabletopPipeline::object_from_contour] | transform → contour → outliers → descriptor |

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use tabletop_perception::cluster::extract_clusters;
use tabletop_perception::descriptor::describe_object;
use tabletop_perception::filter::filter_cloud;
use tabletop_perception::hull::extract_prism;
use tabletop_perception::segmentation::{peel_planes, project_onto_plane, segment_plane, segment_planes};
use tabletop_perception::selection;
use tabletop_perception::transform::PoseProvider;
use tabletop_types::{
    DetectedObject, OrganizedCloud, PerceptionError, Pixel, PixelRect, Plane, PointCloud, Vec3,
};

use crate::config::PipelineConfig;
use crate::frame::FrameTransformer;
use crate::ingest::LatestCloud;

/// Tabletop perception service bound to one input slot and pose provider.
pub struct TabletopPipeline {
    frames: FrameTransformer,
    config: Arc<PipelineConfig>,
    in_flight: Mutex<()>,
}

impl TabletopPipeline {
    pub fn new(source: LatestCloud, poses: Arc<dyn PoseProvider>, config: PipelineConfig) -> Self {
        let frames = FrameTransformer::new(source, poses, config.fixed_frame.clone()).with_timeouts(
            config.input_timeout(),
            config.transform_timeout(),
            config.poll_interval(),
        );
        Self {
            frames,
            config: Arc::new(config),
            in_flight: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The dominant plane of the filtered scene.
    #[instrument(skip(self))]
    pub async fn segment_single_plane(&self) -> Result<Plane, PerceptionError> {
        self.run("segment_single_plane", |cloud, cfg| {
            table_plane(&cloud, cfg).map(|(_, plane)| plane)
        })
        .await
    }

    /// Every plane of at least `min_plane_size` points, in peel-off order.
    #[instrument(skip(self))]
    pub async fn segment_multiple_planes(&self) -> Result<Vec<Plane>, PerceptionError> {
        self.run("segment_multiple_planes", |cloud, cfg| {
            let filtered = filtered(&cloud, cfg)?;
            segment_planes(
                &filtered,
                &cfg.multi_plane_params(),
                cfg.segmentation.min_plane_size,
            )
        })
        .await
    }

    /// Points of the filtered scene inside the prism above the table plane.
    #[instrument(skip(self))]
    pub async fn extract_tabletop_region(&self) -> Result<PointCloud, PerceptionError> {
        self.run("extract_tabletop_region", |cloud, cfg| {
            tabletop(&cloud, cfg)
        })
        .await
    }

    /// Objects resting on the table, largest first.
    #[instrument(skip(self))]
    pub async fn cluster_tabletop_objects(
        &self,
        compute_normals: bool,
    ) -> Result<Vec<DetectedObject>, PerceptionError> {
        self.run("cluster_tabletop_objects", move |cloud, cfg| {
            let region = tabletop(&cloud, cfg)?;
            let normals = compute_normals.then(|| cfg.normal_params());
            let objects = extract_clusters(&region, cfg.cluster_params())?
                .into_iter()
                .map(|cluster| describe_object(cluster, normals))
                .collect::<Result<Vec<_>, _>>()?;
            info!(objects = objects.len(), "tabletop objects clustered");
            Ok(objects)
        })
        .await
    }

    /// Fixed-frame position of the point at pixel (`col`, `row`).
    #[instrument(skip(self))]
    pub async fn point_at(&self, col: usize, row: usize) -> Result<Vec3, PerceptionError> {
        self.run("point_at", move |cloud, _| {
            selection::point_at(&OrganizedCloud::try_from(cloud)?, Pixel::new(col, row))
        })
        .await
    }

    /// The object covered by a pixel rectangle.
    #[instrument(skip(self))]
    pub async fn object_from_bounding_box(
        &self,
        rect: PixelRect,
    ) -> Result<DetectedObject, PerceptionError> {
        self.run("object_from_bounding_box", move |cloud, cfg| {
            let region = selection::select_rect(
                &OrganizedCloud::try_from(cloud)?,
                rect,
                cfg.outlier_params(),
            )?;
            describe_object(region, None)
        })
        .await
    }

    /// The object enclosed by a pixel contour.
    #[instrument(skip(self, contour), fields(vertices = contour.len()))]
    pub async fn object_from_contour(
        &self,
        contour: Vec<Pixel>,
    ) -> Result<DetectedObject, PerceptionError> {
        self.run("object_from_contour", move |cloud, cfg| {
            let region = selection::select_contour(
                &OrganizedCloud::try_from(cloud)?,
                &contour,
                cfg.outlier_params(),
            )?;
            describe_object(region, None)
        })
        .await
    }

    /// The cropped and downsampled scene every plane operation starts from.
    #[instrument(skip(self))]
    pub async fn filtered_cloud(&self) -> Result<PointCloud, PerceptionError> {
        self.run("filtered_cloud", |cloud, cfg| filtered(&cloud, cfg)).await
    }

    /// The filtered scene with every multi-plane segment removed.
    #[instrument(skip(self))]
    pub async fn remaining_cloud(&self) -> Result<PointCloud, PerceptionError> {
        self.run("remaining_cloud", |cloud, cfg| {
            let filtered = filtered(&cloud, cfg)?;
            Ok(peel_planes(
                &filtered,
                &cfg.multi_plane_params(),
                cfg.segmentation.min_plane_size,
            )
            .residual)
        })
        .await
    }

    /// The latest frame projected onto the table plane.
    #[instrument(skip(self))]
    pub async fn project_onto_table(&self) -> Result<PointCloud, PerceptionError> {
        self.run("project_onto_table", |cloud, cfg| {
            let (_, plane) = table_plane(&cloud, cfg)?;
            Ok(project_onto_plane(&cloud, plane.coefficients))
        })
        .await
    }

    async fn run<T, F>(&self, operation: &'static str, stages: F) -> Result<T, PerceptionError>
    where
        T: Send + 'static,
        F: FnOnce(PointCloud, &PipelineConfig) -> Result<T, PerceptionError> + Send + 'static,
    {
        let _in_flight = self.in_flight.lock().await;
        let result = match self.frames.acquire().await {
            Ok(cloud) => {
                let config = Arc::clone(&self.config);
                match tokio::task::spawn_blocking(move || stages(cloud, config.as_ref())).await {
                    Ok(result) => result,
                    Err(e) => match e.try_into_panic() {
                        Ok(payload) => std::panic::resume_unwind(payload),
                        Err(e) => Err(PerceptionError::InvalidCloud {
                            reason: format!("processing task aborted: {e}"),
                        }),
                    },
                }
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => debug!(operation, "request complete"),
            Err(e) if e.is_benign() => info!(operation, error = %e, "nothing found"),
            Err(e) => warn!(operation, error = %e, "request failed"),
        }
        result
    }
}

fn filtered(cloud: &PointCloud, cfg: &PipelineConfig) -> Result<PointCloud, PerceptionError> {
    filter_cloud(cloud, &cfg.crop_box(), cfg.filters.leaf_size)
}

/// Filtered scene and its dominant plane.
fn table_plane(
    cloud: &PointCloud,
    cfg: &PipelineConfig,
) -> Result<(PointCloud, Plane), PerceptionError> {
    let filtered = filtered(cloud, cfg)?;
    let plane = segment_plane(&filtered, &cfg.single_plane_params())?.plane;
    Ok((filtered, plane))
}

/// Points of the filtered scene above the table plane.
fn tabletop(cloud: &PointCloud, cfg: &PipelineConfig) -> Result<PointCloud, PerceptionError> {
    let (filtered, plane) = table_plane(cloud, cfg)?;
    let region = extract_prism(&filtered, plane.coefficients, &plane.polygon, cfg.height_band())?;
    info!(points = region.len(), "tabletop region extracted");
    Ok(region)
}
