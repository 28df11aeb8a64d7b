use crate::error::SinkError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// One stored frame.
///
/// `accuracy` is 0.0 for a periodic monitoring snapshot and the model
/// confidence for a detection.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRecord {
    pub camera_name: String,
    pub accuracy: f32,
    pub image_jpeg: Vec<u8>,
    pub thumbnail_jpeg: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

impl StorageRecord {
    pub fn is_monitoring_snapshot(&self) -> bool {
        self.accuracy == 0.0
    }
}

/// External relational store
#[async_trait]
pub trait RecordStore: Send + Sync {
    fn name(&self) -> &str;

    /// Insert a record and return its id
    async fn insert(&self, record: &StorageRecord) -> Result<u64, SinkError>;

    async fn fetch(&self, id: u64) -> Result<Option<StorageRecord>, SinkError>;
}

/// Bounded in-process store, oldest records evicted first
pub struct MemoryRecordStore {
    records: Mutex<VecDeque<(u64, StorageRecord)>>,
    capacity: usize,
    next_id: AtomicU64,
}

impl MemoryRecordStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn records(&self) -> Vec<StorageRecord> {
        self.records.lock().iter().map(|(_, r)| r.clone()).collect()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn insert(&self, record: &StorageRecord) -> Result<u64, SinkError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut records = self.records.lock();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back((id, record.clone()));
        Ok(id)
    }

    async fn fetch(&self, id: u64) -> Result<Option<StorageRecord>, SinkError> {
        Ok(self
            .records
            .lock()
            .iter()
            .find(|(record_id, _)| *record_id == id)
            .map(|(_, record)| record.clone()))
    }
}

#[cfg(feature = "database")]
pub use mysql::MySqlRecordStore;

#[cfg(feature = "database")]
mod mysql {
    use super::{RecordStore, StorageRecord};
    use crate::error::SinkError;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
    use sqlx::Row;
    use std::time::Duration;
    use tracing::info;

    const CREATE_TABLE: &str = r#"
        CREATE TABLE IF NOT EXISTS detections_images (
            id BIGINT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
            camera_name VARCHAR(255) NOT NULL,
            accuracy FLOAT NOT NULL,
            blob_jpeg LONGBLOB NOT NULL,
            thumbnail_jpeg MEDIUMBLOB NOT NULL,
            created_at DATETIME(3) NOT NULL,
            INDEX idx_created_at (created_at)
        )
    "#;

    /// `detections_images` table in MySQL
    pub struct MySqlRecordStore {
        pool: MySqlPool,
    }

    impl MySqlRecordStore {
        pub async fn connect(url: &str) -> Result<Self, SinkError> {
            let pool = MySqlPoolOptions::new()
                .max_connections(4)
                .acquire_timeout(Duration::from_secs(5))
                .connect(url)
                .await
                .map_err(|e| SinkError::Connection {
                    details: e.to_string(),
                })?;

            sqlx::query(CREATE_TABLE)
                .execute(&pool)
                .await
                .map_err(|e| SinkError::Connection {
                    details: format!("schema setup failed: {}", e),
                })?;

            info!("Connected to MySQL record store");
            Ok(Self { pool })
        }

        pub fn from_pool(pool: MySqlPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl RecordStore for MySqlRecordStore {
        fn name(&self) -> &str {
            "mysql"
        }

        async fn insert(&self, record: &StorageRecord) -> Result<u64, SinkError> {
            let result = sqlx::query(
                r#"
                INSERT INTO detections_images
                    (camera_name, accuracy, blob_jpeg, thumbnail_jpeg, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.camera_name)
            .bind(record.accuracy)
            .bind(&record.image_jpeg)
            .bind(&record.thumbnail_jpeg)
            .bind(record.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| SinkError::Insert {
                details: e.to_string(),
            })?;

            Ok(result.last_insert_id())
        }

        async fn fetch(&self, id: u64) -> Result<Option<StorageRecord>, SinkError> {
            let row = sqlx::query(
                r#"
                SELECT camera_name, accuracy, blob_jpeg, thumbnail_jpeg, created_at
                FROM detections_images
                WHERE id = ?
                "#,
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| SinkError::Connection {
                details: e.to_string(),
            })?;

            let Some(row) = row else {
                return Ok(None);
            };

            let decode = |e: sqlx::Error| SinkError::Encoding {
                details: e.to_string(),
            };
            Ok(Some(StorageRecord {
                camera_name: row.try_get("camera_name").map_err(decode)?,
                accuracy: row.try_get("accuracy").map_err(decode)?,
                image_jpeg: row.try_get("blob_jpeg").map_err(decode)?,
                thumbnail_jpeg: row.try_get("thumbnail_jpeg").map_err(decode)?,
                created_at: row.try_get::<DateTime<Utc>, _>("created_at").map_err(decode)?,
            }))
        }
    }
}
