//! Bounded queues between the capture loop and slow sinks.
//!
//! The capture loop only ever calls [`PersistenceQueue::enqueue`], which
//! returns within the enqueue timeout whether or not the item was accepted.
//! Each queue owns one [`QueueWorker`] that performs the actual I/O.

mod queue;
mod sinks;
mod store;
#[cfg(test)]
mod tests;

pub use queue::{EnqueueOutcome, PersistenceQueue, QueueItem, QueueWorker, Sink, WorkerReport};
pub use sinks::{
    artifact_stem, parse_artifact_timestamp, DatabaseSink, FileSink, FileWriteRequest,
    RecordEncoding, SnapshotJob, ARTIFACT_EXTENSION, PARTIAL_SUFFIX,
};
#[cfg(feature = "database")]
pub use store::MySqlRecordStore;
pub use store::{MemoryRecordStore, RecordStore, StorageRecord};

use crate::config::StorageConfig;
use std::sync::Arc;
use tracing::info;

pub const DATABASE_QUEUE: &str = "database";
pub const FILE_QUEUE: &str = "file";

impl RecordEncoding {
    pub fn from_config(config: &StorageConfig) -> Self {
        Self {
            camera_name: config.camera_name.clone(),
            jpeg_quality: config.jpeg_quality,
            thumbnail_width: config.thumbnail_width,
            thumbnail_quality: config.thumbnail_quality,
        }
    }
}

/// Open the configured record store, falling back to memory
pub async fn record_store_from_config(
    config: &StorageConfig,
) -> crate::error::Result<Arc<dyn RecordStore>> {
    match config.database_url.as_deref() {
        #[cfg(feature = "database")]
        Some(url) => Ok(Arc::new(MySqlRecordStore::connect(url).await?)),
        #[cfg(not(feature = "database"))]
        Some(_) => Err(crate::error::CatwatchError::component(
            "persistence",
            "database_url is set but the database feature is disabled",
        )),
        None => {
            info!(
                "No database configured, keeping up to {} records in memory",
                config.memory_store_capacity
            );
            Ok(Arc::new(MemoryRecordStore::new(config.memory_store_capacity)))
        }
    }
}
