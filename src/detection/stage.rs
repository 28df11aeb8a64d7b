use super::filter::DetectionFilter;
use super::types::{BoundingBox, Detection, RawDetection};
use crate::error::DetectionError;
use crate::frame::Frame;
use crate::telemetry::{Stage, TelemetryAggregator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};
use uuid::Uuid;

/// External object detection model
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Raw candidates with pixel coordinates relative to `frame`
    async fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError>;

    fn name(&self) -> String;
}

/// Outcome of running one frame through the stage
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    pub detections: Vec<Detection>,
    /// Candidates the model returned before filtering
    pub candidates: usize,
    pub elapsed: Duration,
    /// The model call failed and the frame counts as skipped
    pub error: Option<DetectionError>,
}

/// Calls the model once per frame and keeps the candidates that pass the filter
pub struct DetectionStage {
    detector: Arc<dyn ObjectDetector>,
    filter: DetectionFilter,
    telemetry: Arc<TelemetryAggregator>,
}

impl DetectionStage {
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        filter: DetectionFilter,
        telemetry: Arc<TelemetryAggregator>,
    ) -> Self {
        Self {
            detector,
            filter,
            telemetry,
        }
    }

    pub fn filter(&self) -> &DetectionFilter {
        &self.filter
    }

    /// Accepted detections for `frame`; model failures yield an empty list
    pub async fn process(&self, frame: &Frame) -> Vec<Detection> {
        self.process_frame(frame).await.detections
    }

    pub async fn process_frame(&self, frame: &Frame) -> DetectionOutcome {
        let started = Instant::now();
        let result = self.detector.detect(frame).await;
        let elapsed = started.elapsed();
        self.telemetry.record_stage(Stage::Detect, elapsed);

        let raw = match result {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Detection failed on frame {}: {}", frame.sequence, e);
                self.telemetry.record_detection_error();
                return DetectionOutcome {
                    detections: Vec::new(),
                    candidates: 0,
                    elapsed,
                    error: Some(e),
                };
            }
        };

        let candidates = raw.len();
        let timestamp = DateTime::<Utc>::from(frame.timestamp);
        let detections: Vec<Detection> = raw
            .into_iter()
            .filter_map(|candidate| {
                let bbox = BoundingBox::from_array(candidate.bbox)
                    .normalized(frame.width(), frame.height());
                match self.filter.check(&candidate.class, candidate.confidence, &bbox) {
                    Ok(()) => Some(Detection {
                        id: Uuid::new_v4(),
                        class: candidate.class,
                        confidence: candidate.confidence,
                        bbox,
                        frame_sequence: frame.sequence,
                        timestamp,
                    }),
                    Err(reason) => {
                        trace!(
                            "Rejected {} ({:.2}) on frame {}: {:?}",
                            candidate.class,
                            candidate.confidence,
                            frame.sequence,
                            reason
                        );
                        None
                    }
                }
            })
            .collect();

        if !detections.is_empty() {
            debug!(
                "Frame {}: {} of {} candidates accepted in {:?}",
                frame.sequence,
                detections.len(),
                candidates,
                elapsed
            );
        }

        DetectionOutcome {
            detections,
            candidates,
            elapsed,
            error: None,
        }
    }
}
