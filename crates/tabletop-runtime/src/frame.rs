//! [`FrameTransformer`] – fetch the latest frame and re-express it in the
//! fixed frame.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use tabletop_perception::transform::{PoseProvider, Transform3D, transform_cloud};
use tabletop_types::{PerceptionError, PointCloud};

use crate::ingest::LatestCloud;

/// First stage of every request.
#[derive(Clone)]
pub struct FrameTransformer {
    source: LatestCloud,
    poses: Arc<dyn PoseProvider>,
    fixed_frame: String,
    input_timeout: Duration,
    transform_timeout: Duration,
    poll: Duration,
}

impl FrameTransformer {
    pub fn new(
        source: LatestCloud,
        poses: Arc<dyn PoseProvider>,
        fixed_frame: impl Into<String>,
    ) -> Self {
        Self {
            source,
            poses,
            fixed_frame: fixed_frame.into(),
            input_timeout: Duration::from_secs(5),
            transform_timeout: Duration::from_secs(2),
            poll: Duration::from_millis(100),
        }
    }

    pub fn with_timeouts(mut self, input: Duration, transform: Duration, poll: Duration) -> Self {
        self.input_timeout = input;
        self.transform_timeout = transform;
        self.poll = poll;
        self
    }

    pub fn fixed_frame(&self) -> &str {
        &self.fixed_frame
    }

    /// The latest raw cloud, transformed into the fixed frame.
    ///
    /// Point count, order and grid layout are preserved; the raw frame is not
    /// modified.
    ///
    /// # Errors
    ///
    /// - [`PerceptionError::NoInput`] when no frame arrives in time.
    /// - [`PerceptionError::TransformUnavailable`] when the pose provider
    ///   cannot relate the sensor frame to the fixed frame in time.
    pub async fn acquire(&self) -> Result<PointCloud, PerceptionError> {
        let raw = self
            .source
            .wait_for_frame(self.input_timeout, self.poll)
            .await?;
        let transform = self.wait_for_transform(&raw).await?;
        let cloud = transform_cloud(&raw, &transform, &self.fixed_frame);
        debug!(
            source = %raw.frame_id,
            target = %self.fixed_frame,
            points = cloud.len(),
            "point cloud transformed"
        );
        Ok(cloud)
    }

    async fn wait_for_transform(&self, raw: &PointCloud) -> Result<Transform3D, PerceptionError> {
        let lookup = async {
            loop {
                if let Some(t) = self
                    .poses
                    .lookup_transform(&self.fixed_frame, &raw.frame_id, raw.stamp)
                {
                    return t;
                }
                tokio::time::sleep(self.poll).await;
            }
        };
        tokio::time::timeout(self.transform_timeout, lookup)
            .await
            .map_err(|_| {
                warn!(
                    source = %raw.frame_id,
                    target = %self.fixed_frame,
                    "transform lookup timed out"
                );
                PerceptionError::TransformUnavailable {
                    source_frame: raw.frame_id.clone(),
                    target_frame: self.fixed_frame.clone(),
                    reason: format!(
                        "no transform within {} ms",
                        self.transform_timeout.as_millis()
                    ),
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletop_perception::transform::SharedTfEngine;
    use tabletop_types::{Point, Quaternion, Vec3};

    fn fast(t: FrameTransformer) -> FrameTransformer {
        t.with_timeouts(
            Duration::from_millis(60),
            Duration::from_millis(60),
            Duration::from_millis(5),
        )
    }

    fn camera_cloud() -> PointCloud {
        PointCloud::organized(
            "camera",
            2,
            2,
            vec![
                Point::new(0.0, 0.0, 1.0),
                Point::invalid(),
                Point::new(0.1, 0.0, 1.0),
                Point::new(0.0, 0.1, 1.0),
            ],
        )
        .unwrap()
    }

    #[tokio::test]
    async fn acquire_without_input_is_no_input() {
        let tf = SharedTfEngine::new();
        let t = fast(FrameTransformer::new(LatestCloud::new(), Arc::new(tf), "base_link"));
        assert!(matches!(t.acquire().await, Err(PerceptionError::NoInput { .. })));
    }

    #[tokio::test]
    async fn acquire_without_transform_is_unavailable() {
        let slot = LatestCloud::new();
        slot.publish(camera_cloud());
        let t = fast(FrameTransformer::new(slot, Arc::new(SharedTfEngine::new()), "base_link"));
        match t.acquire().await {
            Err(PerceptionError::TransformUnavailable { source_frame, target_frame, .. }) => {
                assert_eq!(source_frame, "camera");
                assert_eq!(target_frame, "base_link");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn acquire_transforms_and_keeps_layout() {
        let slot = LatestCloud::new();
        slot.publish(camera_cloud());
        let tf = SharedTfEngine::new();
        tf.set_transform(
            "base_link",
            "camera",
            Transform3D::new(Vec3::new(0.0, 0.0, 1.0), Quaternion::identity()),
        );
        let t = fast(FrameTransformer::new(slot.clone(), Arc::new(tf), "base_link"));

        let cloud = t.acquire().await.unwrap();
        assert_eq!(cloud.frame_id, "base_link");
        assert_eq!((cloud.width(), cloud.height()), (2, 2));
        assert!((cloud.points()[0].z - 2.0).abs() < 1e-6);
        assert!(!cloud.points()[1].is_finite());
        // The raw frame is untouched.
        assert_eq!(slot.latest().unwrap().points()[0].z, 1.0);
    }

    #[tokio::test]
    async fn transform_published_while_waiting_is_used() {
        let slot = LatestCloud::new();
        slot.publish(camera_cloud());
        let tf = SharedTfEngine::new();
        let writer = tf.clone();
        let t = FrameTransformer::new(slot, Arc::new(tf), "base_link").with_timeouts(
            Duration::from_millis(500),
            Duration::from_millis(500),
            Duration::from_millis(5),
        );
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.set_transform("base_link", "camera", Transform3D::identity());
        });
        assert!(t.acquire().await.is_ok());
    }
}
