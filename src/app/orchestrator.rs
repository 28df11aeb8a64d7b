use super::{ComponentState, ShutdownReason};
use crate::config::CatwatchConfig;
use crate::detection::{Annotator, DetectionFilter, DetectionStage, HttpDetector, ObjectDetector};
use crate::error::Result;
use crate::eviction::EvictionPolicy;
use crate::hardware::{select_model, HardwareDescriptor, ModelSelection};
use crate::notification::{broker_from_config, NotificationStage};
use crate::persistence::{
    record_store_from_config, DatabaseSink, FileSink, FileWriteRequest, PersistenceQueue,
    QueueWorker, RecordEncoding, SnapshotJob, WorkerReport, DATABASE_QUEUE, FILE_QUEUE,
};
use crate::pipeline::{Pipeline, PipelineSettings, PipelineStages};
use crate::source::{connector_from_config, FrameSource, SourceSettings, StreamConnector};
use crate::telemetry::{StatusFeed, TelemetryAggregator};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(feature = "streaming")]
use crate::streaming::StatusServer;

/// Handles of the spawned component tasks
#[derive(Default)]
pub(super) struct ComponentTasks {
    pub capture: Option<JoinHandle<()>>,
    pub database_queue: Option<JoinHandle<WorkerReport>>,
    pub file_queue: Option<JoinHandle<WorkerReport>>,
    pub eviction: Option<JoinHandle<()>>,
    pub heartbeat: Option<JoinHandle<()>>,
    pub status_feed: Option<JoinHandle<()>>,
    pub status_server: Option<JoinHandle<Result<()>>>,
}

/// Cancellation scopes, children of one root token so components can be
/// stopped in order during shutdown
pub(super) struct ShutdownTokens {
    pub root: CancellationToken,
    pub capture: CancellationToken,
    pub queues: CancellationToken,
    pub background: CancellationToken,
    pub server: CancellationToken,
}

impl ShutdownTokens {
    fn new() -> Self {
        let root = CancellationToken::new();
        Self {
            capture: root.child_token(),
            queues: root.child_token(),
            background: root.child_token(),
            server: root.child_token(),
            root,
        }
    }
}

/// Wires the frame source, detection, persistence, notification and
/// monitoring together and owns their lifecycles
pub struct CatwatchOrchestrator {
    pub(super) config: CatwatchConfig,
    pub(super) hardware: Option<HardwareDescriptor>,
    pub(super) model: ModelSelection,
    pub(super) telemetry: Arc<TelemetryAggregator>,
    pub(super) feed: Arc<StatusFeed>,
    pub(super) notifier: Arc<NotificationStage>,
    pub(super) eviction: Arc<EvictionPolicy>,
    pub(super) pipeline: Option<Pipeline>,
    pub(super) database_worker: Option<QueueWorker<SnapshotJob>>,
    pub(super) file_worker: Option<QueueWorker<FileWriteRequest>>,
    #[cfg(feature = "streaming")]
    pub(super) status_server: Option<Arc<StatusServer>>,
    pub(super) tasks: ComponentTasks,
    pub(super) tokens: ShutdownTokens,
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
}

impl CatwatchOrchestrator {
    /// Build every component from configuration, probing the host to pick
    /// the detection model
    pub async fn new(config: CatwatchConfig) -> Result<Self> {
        let mut hardware = HardwareDescriptor::probe();
        if let Some(device_class) = config.detection.hardware_type {
            hardware = hardware.with_device_class(device_class);
        }
        let model = select_model(&hardware, config.detection.model.as_deref());
        info!(
            "Using model {} on {:?} (accelerated: {}, overridden: {})",
            model.model, model.device_class, model.accelerated, model.overridden
        );

        let detector = Arc::new(HttpDetector::new(
            config.detection.endpoint.clone(),
            model.model.clone(),
            Duration::from_millis(config.detection.request_timeout_ms),
        )?);
        let connector = connector_from_config(&config.stream)?;

        let mut orchestrator = Self::assemble(config, model, connector, detector).await?;
        orchestrator.hardware = Some(hardware);
        Ok(orchestrator)
    }

    /// Build around an explicit connector and detector
    pub async fn assemble(
        config: CatwatchConfig,
        model: ModelSelection,
        connector: Arc<dyn StreamConnector>,
        detector: Arc<dyn ObjectDetector>,
    ) -> Result<Self> {
        let telemetry = Arc::new(TelemetryAggregator::new(
            config.monitoring.history_size,
            config.monitoring.recent_detections,
        ));
        let feed = Arc::new(StatusFeed::new(Arc::clone(&telemetry), &config.monitoring));

        let source = FrameSource::new(connector, SourceSettings::from(&config.stream))
            .with_telemetry(Arc::clone(&telemetry));

        let storage = &config.storage;
        let store = record_store_from_config(storage).await?;
        let (database, database_worker) = PersistenceQueue::<SnapshotJob>::bounded(
            storage.queue_capacity,
            storage.enqueue_timeout(),
            storage.drain_timeout(),
            Arc::new(DatabaseSink::new(store, RecordEncoding::from_config(storage))),
            telemetry.register_queue(DATABASE_QUEUE, storage.queue_capacity),
        );
        let (files, file_worker) = PersistenceQueue::<FileWriteRequest>::bounded(
            storage.queue_capacity,
            storage.enqueue_timeout(),
            storage.drain_timeout(),
            Arc::new(FileSink::new(&storage.output_dir, storage.jpeg_quality)),
            telemetry.register_queue(FILE_QUEUE, storage.queue_capacity),
        );

        let broker = broker_from_config(&config.notification)?;
        let notifier = Arc::new(NotificationStage::from_config(
            broker,
            &config.notification,
            storage,
            Arc::clone(&telemetry),
        ));

        let stages = PipelineStages {
            detection: DetectionStage::new(
                detector,
                DetectionFilter::from_config(&config.detection),
                Arc::clone(&telemetry),
            ),
            annotator: Arc::new(Annotator::from_config(&config.detection)),
            notifier: Arc::clone(&notifier),
            database,
            files,
            feed: Arc::clone(&feed),
        };
        let settings = PipelineSettings {
            max_resolution: config.stream.max_resolution,
            ..PipelineSettings::default()
        };
        let pipeline = Pipeline::new(source, stages, Arc::clone(&telemetry), settings);

        let eviction = Arc::new(EvictionPolicy::from_config(storage));

        #[cfg(feature = "streaming")]
        let status_server = config.monitoring.enabled.then(|| {
            Arc::new(StatusServer::new(
                config.monitoring.clone(),
                Arc::clone(&feed),
                storage.camera_name.clone(),
            ))
        });

        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            hardware: None,
            model,
            telemetry,
            feed,
            notifier,
            eviction,
            pipeline: Some(pipeline),
            database_worker: Some(database_worker),
            file_worker: Some(file_worker),
            #[cfg(feature = "streaming")]
            status_server,
            tasks: ComponentTasks::default(),
            tokens: ShutdownTokens::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Arc::new(Mutex::new(Some(shutdown_sender))),
            shutdown_receiver: Some(shutdown_receiver),
        })
    }

    pub fn config(&self) -> &CatwatchConfig {
        &self.config
    }

    /// Probed host profile; `None` when built through [`Self::assemble`]
    pub fn hardware(&self) -> Option<&HardwareDescriptor> {
        self.hardware.as_ref()
    }

    pub fn model(&self) -> &ModelSelection {
        &self.model
    }

    pub fn telemetry(&self) -> &Arc<TelemetryAggregator> {
        &self.telemetry
    }

    pub fn feed(&self) -> &Arc<StatusFeed> {
        &self.feed
    }

    /// Ask a running orchestrator to shut down. Only the first reason wins.
    pub async fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        match self.shutdown_sender.lock().await.take() {
            Some(sender) => sender.send(reason).is_ok(),
            None => false,
        }
    }
}
