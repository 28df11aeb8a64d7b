use super::aggregator::TelemetryAggregator;
use super::snapshot::TelemetrySnapshot;
use crate::config::MonitoringConfig;
use crate::error::Result;
use crate::frame::Frame;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Message pushed to live subscribers on every tick
#[derive(Debug, Clone, Serialize)]
pub struct StatusUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub timestamp: DateTime<Utc>,
    pub data: TelemetrySnapshot,
}

/// Read side of the pipeline's live state.
///
/// Holds the single "latest frame" reference and fans periodic snapshots out
/// to subscribers. Subscribers get a bounded buffer each; a subscriber that
/// falls behind loses its oldest updates instead of slowing the ticker.
pub struct StatusFeed {
    telemetry: Arc<TelemetryAggregator>,
    current_frame: RwLock<Option<Frame>>,
    updates: broadcast::Sender<Arc<StatusUpdate>>,
    update_interval: Duration,
    frame_jpeg_quality: u8,
}

impl StatusFeed {
    pub fn new(telemetry: Arc<TelemetryAggregator>, config: &MonitoringConfig) -> Self {
        let (updates, _) = broadcast::channel(config.subscriber_buffer.max(1));
        Self {
            telemetry,
            current_frame: RwLock::new(None),
            updates,
            update_interval: Duration::from_millis(config.update_interval_ms.max(1)),
            frame_jpeg_quality: config.frame_jpeg_quality,
        }
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.telemetry.snapshot()
    }

    /// Most recently published frame, if any
    pub fn current_frame(&self) -> Option<Frame> {
        self.current_frame.read().clone()
    }

    /// Replace the latest frame reference; the previous frame is dropped once
    /// no reader holds it
    pub fn publish_frame(&self, frame: Frame) {
        let previous = self.current_frame.write().replace(frame);
        drop(previous);
    }

    /// Encode the latest frame as JPEG on the caller's thread
    pub fn current_frame_jpeg(&self) -> Result<Option<Vec<u8>>> {
        match self.current_frame() {
            Some(frame) => Ok(Some(self.encode_frame(&frame)?)),
            None => Ok(None),
        }
    }

    pub fn encode_frame(&self, frame: &Frame) -> Result<Vec<u8>> {
        frame.to_jpeg(self.frame_jpeg_quality)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StatusUpdate>> {
        self.updates.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.updates.receiver_count()
    }

    pub fn update_interval(&self) -> Duration {
        self.update_interval
    }

    /// Build and broadcast one update; returns receivers reached
    pub fn tick(&self) -> usize {
        if self.updates.receiver_count() == 0 {
            return 0;
        }
        let update = StatusUpdate {
            kind: "update",
            timestamp: Utc::now(),
            data: self.snapshot(),
        };
        self.updates.send(Arc::new(update)).unwrap_or(0)
    }

    /// Tick until cancelled
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!("Status feed started ({:?} interval)", self.update_interval);
        let mut ticker = interval(self.update_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let reached = self.tick();
                    if reached > 0 {
                        debug!("Status update sent to {} subscribers", reached);
                    }
                }
            }
        }

        info!("Status feed stopped");
    }
}
