use crate::detection::{Annotator, DetectionStage};
use crate::error::StreamError;
use crate::frame::Frame;
use crate::notification::NotificationStage;
use crate::persistence::{EnqueueOutcome, FileWriteRequest, PersistenceQueue, SnapshotJob};
use crate::source::{FrameSource, SourceEvent};
use crate::telemetry::{Stage, StatusFeed, TelemetryAggregator};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Accuracy stored with periodic monitoring snapshots
pub const MONITORING_ACCURACY: f32 = 0.0;

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Frames larger than this are downscaled before detection
    pub max_resolution: (u32, u32),
    /// Time between monitoring snapshots; the first frame always produces one
    pub monitoring_interval: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_resolution: (1920, 1080),
            monitoring_interval: Duration::from_secs(3600),
        }
    }
}

/// Why the capture loop returned normally
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineExit {
    Cancelled,
    EndOfStream,
}

/// Everything downstream of the frame source
pub struct PipelineStages {
    pub detection: DetectionStage,
    pub annotator: Arc<Annotator>,
    pub notifier: Arc<NotificationStage>,
    pub database: PersistenceQueue<SnapshotJob>,
    pub files: PersistenceQueue<FileWriteRequest>,
    pub feed: Arc<StatusFeed>,
}

/// The capture loop: pulls frames in order and fans each one out to
/// detection, notification and the persistence queues
pub struct Pipeline {
    source: FrameSource,
    stages: PipelineStages,
    telemetry: Arc<TelemetryAggregator>,
    settings: PipelineSettings,
    last_snapshot: Option<Instant>,
}

impl Pipeline {
    pub fn new(
        source: FrameSource,
        stages: PipelineStages,
        telemetry: Arc<TelemetryAggregator>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            source,
            stages,
            telemetry,
            settings,
            last_snapshot: None,
        }
    }

    pub fn source(&self) -> &FrameSource {
        &self.source
    }

    /// Run until cancelled, the stream ends, or the source gives up.
    ///
    /// Returns `Err` only when the source reached its fatal state.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<PipelineExit, StreamError> {
        info!("Capture loop starting");
        self.source.open().await;

        let exit = loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(PipelineExit::Cancelled),
                event = self.source.next() => event,
            };

            match event {
                Ok(SourceEvent::Frame(frame)) => {
                    self.telemetry.record_frame_captured(&frame);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            self.telemetry.record_frame_skipped();
                            break Ok(PipelineExit::Cancelled);
                        }
                        _ = self.process_frame(frame) => {}
                    }
                }
                Ok(SourceEvent::TransientError(e)) => {
                    debug!("Transient stream error: {}", e);
                }
                Ok(SourceEvent::EndOfStream) => {
                    info!("Stream ended");
                    break Ok(PipelineExit::EndOfStream);
                }
                Err(e) => {
                    error!("Frame source failed permanently: {}", e);
                    break Err(e);
                }
            }
        };

        self.source.close().await;
        info!(
            "Capture loop stopped: {} captured, {} processed, {} skipped",
            self.telemetry.frames_captured(),
            self.telemetry.frames_processed(),
            self.telemetry.frames_skipped()
        );
        exit
    }

    async fn process_frame(&mut self, frame: Frame) {
        let started = Instant::now();

        let resize_started = Instant::now();
        let (max_width, max_height) = self.settings.max_resolution;
        let frame = if frame.width() > max_width || frame.height() > max_height {
            let original = frame.clone();
            match tokio::task::spawn_blocking(move || original.fit_within(max_width, max_height)).await {
                Ok(resized) => resized,
                Err(e) => {
                    warn!("Resize of frame {} failed: {}", frame.sequence, e);
                    frame
                }
            }
        } else {
            frame
        };
        self.telemetry.record_stage(Stage::Resize, resize_started.elapsed());

        self.stages.feed.publish_frame(frame.clone());
        self.store_monitoring_snapshot(&frame).await;

        let outcome = self.stages.detection.process_frame(&frame).await;
        if outcome.error.is_some() {
            self.telemetry.record_frame_skipped();
            return;
        }

        if !outcome.detections.is_empty() {
            let annotated = if self.stages.annotator.is_enabled() {
                let annotator = Arc::clone(&self.stages.annotator);
                let annotated_frame = frame.clone();
                let detections = outcome.detections.clone();
                tokio::task::spawn_blocking(move || annotator.render(&annotated_frame, &detections))
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Annotation of frame {} failed: {}", frame.sequence, e);
                        Arc::clone(&frame.image)
                    })
            } else {
                Arc::clone(&frame.image)
            };

            for detection in &outcome.detections {
                info!(
                    "Detected {} ({:.2}) on frame {}",
                    detection.class, detection.confidence, frame.sequence
                );
                self.telemetry.record_detection(detection);
                self.stages.notifier.spawn_notify(detection.clone());

                let job = SnapshotJob {
                    image: Arc::clone(&annotated),
                    accuracy: detection.confidence,
                    captured_at: frame.timestamp,
                };
                if self.stages.database.enqueue(job).await == EnqueueOutcome::Dropped {
                    warn!("Database queue full, detection {} not stored", detection.id);
                }
            }

            let request = FileWriteRequest {
                image: annotated,
                captured_at: frame.timestamp,
            };
            if self.stages.files.enqueue(request).await == EnqueueOutcome::Dropped {
                warn!("File queue full, frame {} not written", frame.sequence);
            }
        }

        self.telemetry
            .record_frame_processed(started.elapsed(), frame.age());
    }

    async fn store_monitoring_snapshot(&mut self, frame: &Frame) {
        let due = self
            .last_snapshot
            .map_or(true, |at| at.elapsed() >= self.settings.monitoring_interval);
        if !due {
            return;
        }
        self.last_snapshot = Some(Instant::now());

        let job = SnapshotJob {
            image: Arc::clone(&frame.image),
            accuracy: MONITORING_ACCURACY,
            captured_at: frame.timestamp,
        };
        match self.stages.database.enqueue(job).await {
            EnqueueOutcome::Accepted => {
                self.telemetry.record_monitoring_snapshot();
                debug!("Monitoring snapshot queued from frame {}", frame.sequence);
            }
            EnqueueOutcome::Dropped => warn!("Database queue full, monitoring snapshot skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IgnoreZoneMode, MonitoringConfig, NotificationConfig};
    use crate::detection::{DetectionFilter, ObjectDetector, RawDetection};
    use crate::error::DetectionError;
    use crate::notification::LogBroker;
    use crate::persistence::{
        DatabaseSink, FileSink, MemoryRecordStore, QueueWorker, RecordEncoding, RecordStore,
        DATABASE_QUEUE, FILE_QUEUE,
    };
    use crate::source::{SourceSettings, SyntheticConnector};
    use async_trait::async_trait;

    /// Cat on every even frame, model error on frame 3
    struct PatternDetector;

    #[async_trait]
    impl ObjectDetector for PatternDetector {
        async fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
            match frame.sequence {
                3 => Err(DetectionError::Invocation {
                    details: "model crashed".to_string(),
                }),
                n if n % 2 == 0 => Ok(vec![
                    RawDetection {
                        class: "cat".to_string(),
                        confidence: 0.9,
                        bbox: [10.0, 10.0, 30.0, 30.0],
                    },
                    RawDetection {
                        class: "cat".to_string(),
                        confidence: 0.2,
                        bbox: [40.0, 40.0, 60.0, 60.0],
                    },
                ]),
                _ => Ok(Vec::new()),
            }
        }

        fn name(&self) -> String {
            "pattern".to_string()
        }
    }

    struct Harness {
        pipeline: Pipeline,
        telemetry: Arc<TelemetryAggregator>,
        store: Arc<MemoryRecordStore>,
        broker: Arc<LogBroker>,
        feed: Arc<StatusFeed>,
        db_worker: QueueWorker<SnapshotJob>,
        file_worker: QueueWorker<FileWriteRequest>,
        output: tempfile::TempDir,
    }

    fn harness(frames: u64) -> Harness {
        let telemetry = Arc::new(TelemetryAggregator::default());
        let connector = Arc::new(SyntheticConnector::new(64, 48, 200).with_frame_limit(frames));
        let source = FrameSource::new(
            connector,
            SourceSettings {
                mode: crate::config::ConnectionMode::Continuous,
                connect_timeout: Duration::from_secs(1),
                read_timeout: Duration::from_secs(1),
                recovery: crate::recovery::RecoveryConfig::default(),
            },
        )
        .with_telemetry(Arc::clone(&telemetry));

        let store = Arc::new(MemoryRecordStore::new(100));
        let output = tempfile::tempdir().unwrap();
        let (database, db_worker) = PersistenceQueue::bounded(
            32,
            Duration::from_millis(50),
            Duration::from_secs(2),
            Arc::new(DatabaseSink::new(
                store.clone(),
                RecordEncoding {
                    camera_name: "cam_test".to_string(),
                    jpeg_quality: 80,
                    thumbnail_width: 32,
                    thumbnail_quality: 80,
                },
            )),
            telemetry.register_queue(DATABASE_QUEUE, 32),
        );
        let (files, file_worker) = PersistenceQueue::bounded(
            32,
            Duration::from_millis(50),
            Duration::from_secs(2),
            Arc::new(FileSink::new(output.path(), 80)),
            telemetry.register_queue(FILE_QUEUE, 32),
        );

        let broker = Arc::new(LogBroker::new());
        let notifier = Arc::new(NotificationStage::new(
            broker.clone(),
            &NotificationConfig::default(),
            "cam_test",
            Arc::clone(&telemetry),
        ));
        let feed = Arc::new(StatusFeed::new(
            Arc::clone(&telemetry),
            &MonitoringConfig::default(),
        ));

        let stages = PipelineStages {
            detection: DetectionStage::new(
                Arc::new(PatternDetector),
                DetectionFilter::new(0.5, None, IgnoreZoneMode::Center),
                Arc::clone(&telemetry),
            ),
            annotator: Arc::new(Annotator::disabled()),
            notifier,
            database,
            files,
            feed: Arc::clone(&feed),
        };

        let pipeline = Pipeline::new(
            source,
            stages,
            Arc::clone(&telemetry),
            PipelineSettings {
                max_resolution: (32, 32),
                monitoring_interval: Duration::from_secs(3600),
            },
        );

        Harness {
            pipeline,
            telemetry,
            store,
            broker,
            feed,
            db_worker,
            file_worker,
            output,
        }
    }

    #[tokio::test]
    async fn test_pipeline_fans_out_detections() {
        let h = harness(6);
        let cancel = CancellationToken::new();
        let db = tokio::spawn(h.db_worker.run(cancel.clone()));
        let files = tokio::spawn(h.file_worker.run(cancel.clone()));

        let exit = h.pipeline.run(cancel.clone()).await.unwrap();
        assert_eq!(exit, PipelineExit::EndOfStream);

        // Let the fire-and-forget publishes finish
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        db.await.unwrap();
        files.await.unwrap();

        // Frames 1..=6; frame 3 fails detection
        let metrics = h.telemetry.snapshot().metrics;
        assert_eq!(metrics.frames_captured, 6);
        assert_eq!(metrics.frames_processed, 5);
        assert_eq!(metrics.frames_skipped, 1);
        assert_eq!(metrics.detection_errors, 1);
        assert_eq!(metrics.detections_total, 3);
        assert_eq!(metrics.monitoring_snapshots, 1);

        // One monitoring snapshot plus one record per detection
        let records = h.store.records();
        assert_eq!(records.len(), 4);
        assert_eq!(
            records.iter().filter(|r| r.is_monitoring_snapshot()).count(),
            1
        );
        assert!(records
            .iter()
            .filter(|r| !r.is_monitoring_snapshot())
            .all(|r| (r.accuracy - 0.9).abs() < 1e-6));
        assert!(records.iter().all(|r| r.camera_name == "cam_test"));

        let written = std::fs::read_dir(h.output.path()).unwrap().count();
        assert_eq!(written, 3);

        let published = h.broker.published();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|(topic, _)| topic == "catwatch/cat"));

        // Frames are downscaled before they reach the feed
        let current = h.feed.current_frame().unwrap();
        assert_eq!(current.sequence, 6);
        assert!(current.width() <= 32 && current.height() <= 32);
    }

    #[tokio::test]
    async fn test_pipeline_stops_on_cancel() {
        let h = harness(u64::MAX);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(h.pipeline.run(cancel.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let exit = tokio::time::timeout(Duration::from_secs(2), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();

        assert_eq!(exit, PipelineExit::Cancelled);
        let metrics = h.telemetry.snapshot().metrics;
        assert!(metrics.frames_captured > 0);
        assert_eq!(
            metrics.frames_captured,
            metrics.frames_processed + metrics.frames_skipped
        );
    }

    #[tokio::test]
    async fn test_pipeline_surfaces_fatal_source() {
        struct DeadConnector;

        #[async_trait]
        impl crate::source::StreamConnector for DeadConnector {
            async fn connect(
                &self,
            ) -> Result<Box<dyn crate::source::StreamConnection>, StreamError> {
                Err(StreamError::ConnectFailed {
                    url: "rtsp://dead".to_string(),
                    details: "no route to host".to_string(),
                })
            }

            fn describe(&self) -> String {
                "rtsp://dead".to_string()
            }
        }

        let mut h = harness(1);
        h.pipeline.source = FrameSource::new(
            Arc::new(DeadConnector),
            SourceSettings {
                mode: crate::config::ConnectionMode::Continuous,
                connect_timeout: Duration::from_millis(50),
                read_timeout: Duration::from_millis(50),
                recovery: crate::recovery::RecoveryConfig {
                    max_retries: 2,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    multiplier: 2.0,
                },
            },
        );

        let result = h.pipeline.run(CancellationToken::new()).await;
        assert!(result.is_err());
        assert_eq!(h.telemetry.frames_captured(), 0);
    }
}
