//! [`LatestCloud`] – the single-slot mailbox between the sensor and the
//! pipeline.
//!
//! The sensor side [`publish`][LatestCloud::publish]es every frame; each
//! publish replaces the previous frame atomically.  Readers take an
//! immutable snapshot ([`Arc<PointCloud>`]) and are never blocked by, nor see
//! a half-written, newer frame.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, trace};

use tabletop_types::{PerceptionError, PointCloud};

/// Snapshot cell holding the most recent raw sensor cloud.
#[derive(Clone)]
pub struct LatestCloud {
    tx: Arc<watch::Sender<Option<Arc<PointCloud>>>>,
}

impl Default for LatestCloud {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestCloud {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Replace the current frame.
    pub fn publish(&self, cloud: PointCloud) {
        trace!(frame = %cloud.frame_id, points = cloud.len(), "cloud published");
        self.tx.send_replace(Some(Arc::new(cloud)));
    }

    /// The current frame, if any has been published.
    pub fn latest(&self) -> Option<Arc<PointCloud>> {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every publish.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<PointCloud>>> {
        self.tx.subscribe()
    }

    /// Wait until a frame is available, checking every `poll`.
    ///
    /// # Errors
    ///
    /// [`PerceptionError::NoInput`] when nothing arrives within `timeout`.
    pub async fn wait_for_frame(
        &self,
        timeout: Duration,
        poll: Duration,
    ) -> Result<Arc<PointCloud>, PerceptionError> {
        let wait = async {
            loop {
                if let Some(cloud) = self.latest() {
                    return cloud;
                }
                tokio::time::sleep(poll).await;
            }
        };
        match tokio::time::timeout(timeout, wait).await {
            Ok(cloud) => {
                debug!(frame = %cloud.frame_id, points = cloud.len(), "frame acquired");
                Ok(cloud)
            }
            Err(_) => Err(PerceptionError::NoInput {
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tabletop_types::Vec3;

    fn cloud(n: usize) -> PointCloud {
        PointCloud::from_positions("camera", (0..n).map(|i| Vec3::new(i as f32, 0.0, 1.0)))
    }

    #[test]
    fn publish_replaces_previous_frame() {
        let slot = LatestCloud::new();
        assert!(slot.latest().is_none());
        slot.publish(cloud(3));
        slot.publish(cloud(5));
        assert_eq!(slot.latest().map(|c| c.len()), Some(5));
    }

    #[test]
    fn snapshot_survives_later_publish() {
        let slot = LatestCloud::new();
        slot.publish(cloud(2));
        let snapshot = slot.latest().unwrap();
        slot.publish(cloud(7));
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn subscribers_see_updates() {
        let slot = LatestCloud::new();
        let mut rx = slot.subscribe();
        slot.publish(cloud(1));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_ref().map(|c| c.len()), Some(1));
    }

    #[tokio::test]
    async fn wait_times_out_without_input() {
        let slot = LatestCloud::new();
        let err = slot
            .wait_for_frame(Duration::from_millis(50), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert_eq!(err, PerceptionError::NoInput { waited_ms: 50 });
    }

    #[tokio::test]
    async fn wait_returns_frame_published_later() {
        let slot = LatestCloud::new();
        let publisher = slot.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(cloud(4));
        });
        let got = slot
            .wait_for_frame(Duration::from_secs(2), Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(got.len(), 4);
    }
}
