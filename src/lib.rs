pub mod app;
pub mod config;
pub mod detection;
pub mod error;
pub mod eviction;
pub mod frame;
pub mod hardware;
pub mod notification;
pub mod persistence;
pub mod pipeline;
pub mod recovery;
pub mod source;
pub mod telemetry;

#[cfg(feature = "streaming")]
pub mod streaming;

pub use app::{CatwatchOrchestrator, ComponentState, ShutdownReason};
pub use config::CatwatchConfig;
pub use detection::{BoundingBox, Detection, DetectionStage, ObjectDetector};
pub use error::{CatwatchError, DetectionError, Result, SinkError, StreamError};
pub use eviction::{EvictionPolicy, EvictionReport};
pub use frame::Frame;
pub use hardware::{select_model, HardwareDescriptor, ModelSelection};
pub use notification::{Broker, NotificationStage};
pub use persistence::{PersistenceQueue, RecordStore, StorageRecord};
pub use pipeline::{Pipeline, PipelineExit};
pub use recovery::{RecoveryAction, RecoveryConfig, RecoveryManager};
pub use source::{ConnectionState, FrameSource, StreamConnector};
pub use telemetry::{StatusFeed, TelemetryAggregator, TelemetrySnapshot};

#[cfg(feature = "streaming")]
pub use streaming::StatusServer;
