use super::queue::Sink;
use super::store::{RecordStore, StorageRecord};
use crate::error::SinkError;
use crate::frame::{encode_jpeg, thumbnail};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::fs;
use tracing::debug;

/// Extension of committed detection images
pub const ARTIFACT_EXTENSION: &str = "jpg";
/// Suffix of images still being written
pub const PARTIAL_SUFFIX: &str = ".partial";
const ARTIFACT_PREFIX: &str = "frame_";

/// Frame to be stored as a database record
#[derive(Debug, Clone)]
pub struct SnapshotJob {
    pub image: Arc<RgbImage>,
    pub accuracy: f32,
    pub captured_at: SystemTime,
}

/// Encoding settings for database records
#[derive(Debug, Clone)]
pub struct RecordEncoding {
    pub camera_name: String,
    pub jpeg_quality: u8,
    pub thumbnail_width: u32,
    pub thumbnail_quality: u8,
}

/// Encodes snapshot jobs and inserts them into a [`RecordStore`]
pub struct DatabaseSink {
    store: Arc<dyn RecordStore>,
    encoding: RecordEncoding,
}

impl DatabaseSink {
    pub fn new(store: Arc<dyn RecordStore>, encoding: RecordEncoding) -> Self {
        Self { store, encoding }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }
}

#[async_trait]
impl Sink<SnapshotJob> for DatabaseSink {
    fn name(&self) -> &str {
        self.store.name()
    }

    async fn write(&self, job: SnapshotJob) -> Result<(), SinkError> {
        let encoding = self.encoding.clone();
        let image = Arc::clone(&job.image);
        let (image_jpeg, thumbnail_jpeg) = tokio::task::spawn_blocking(move || {
            let full = encode_jpeg(&image, encoding.jpeg_quality)?;
            let thumb = thumbnail(&image, encoding.thumbnail_width);
            let thumb = encode_jpeg(&thumb, encoding.thumbnail_quality)?;
            Ok::<_, crate::error::CatwatchError>((full, thumb))
        })
        .await
        .map_err(|e| SinkError::Encoding {
            details: e.to_string(),
        })?
        .map_err(|e| SinkError::Encoding {
            details: e.to_string(),
        })?;

        let record = StorageRecord {
            camera_name: self.encoding.camera_name.clone(),
            accuracy: job.accuracy,
            image_jpeg,
            thumbnail_jpeg,
            // DATETIME(3) keeps milliseconds
            created_at: DateTime::<Utc>::from(job.captured_at).trunc_subsecs(3),
        };

        let id = self.store.insert(&record).await?;
        debug!(
            "Stored record {} (accuracy {:.2}, {} bytes)",
            id,
            record.accuracy,
            record.image_jpeg.len()
        );
        Ok(())
    }
}

/// Annotated detection frame to be written to the output directory
#[derive(Debug, Clone)]
pub struct FileWriteRequest {
    pub image: Arc<RgbImage>,
    pub captured_at: SystemTime,
}

/// Writes JPEG files so that only complete files carry the final name
pub struct FileSink {
    output_dir: PathBuf,
    jpeg_quality: u8,
}

impl FileSink {
    pub fn new(output_dir: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            output_dir: output_dir.into(),
            jpeg_quality,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Pick a file name that does not collide with an existing artifact
    async fn target_path(&self, captured_at: SystemTime) -> PathBuf {
        let stem = artifact_stem(captured_at);
        let mut path = self.output_dir.join(format!("{}.{}", stem, ARTIFACT_EXTENSION));
        let mut suffix = 1;
        while fs::try_exists(&path).await.unwrap_or(false) {
            path = self
                .output_dir
                .join(format!("{}_{}.{}", stem, suffix, ARTIFACT_EXTENSION));
            suffix += 1;
        }
        path
    }
}

#[async_trait]
impl Sink<FileWriteRequest> for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn write(&self, request: FileWriteRequest) -> Result<(), SinkError> {
        let quality = self.jpeg_quality;
        let image = Arc::clone(&request.image);
        let jpeg = tokio::task::spawn_blocking(move || encode_jpeg(&image, quality))
            .await
            .map_err(|e| SinkError::Encoding {
                details: e.to_string(),
            })?
            .map_err(|e| SinkError::Encoding {
                details: e.to_string(),
            })?;

        fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| file_error(&self.output_dir, e))?;

        let final_path = self.target_path(request.captured_at).await;
        let mut partial_name = final_path.as_os_str().to_owned();
        partial_name.push(PARTIAL_SUFFIX);
        let partial_path = PathBuf::from(partial_name);

        if let Err(e) = fs::write(&partial_path, &jpeg).await {
            let _ = fs::remove_file(&partial_path).await;
            return Err(file_error(&partial_path, e));
        }
        fs::rename(&partial_path, &final_path)
            .await
            .map_err(|e| file_error(&final_path, e))?;

        debug!("Wrote {} ({} bytes)", final_path.display(), jpeg.len());
        Ok(())
    }
}

fn file_error(path: &Path, e: std::io::Error) -> SinkError {
    SinkError::FileWrite {
        path: path.display().to_string(),
        details: e.to_string(),
    }
}

/// `frame_YYYYMMDD_HHMMSS_mmm`
pub fn artifact_stem(timestamp: SystemTime) -> String {
    let datetime: DateTime<Utc> = timestamp.into();
    format!("{}{}", ARTIFACT_PREFIX, datetime.format("%Y%m%d_%H%M%S_%3f"))
}

/// Recover the capture time from an artifact file name
pub fn parse_artifact_timestamp(file_name: &str) -> Option<SystemTime> {
    let stem = file_name
        .strip_prefix(ARTIFACT_PREFIX)?
        .strip_suffix(ARTIFACT_EXTENSION)?
        .strip_suffix('.')?;
    // Collision suffixes follow the 19 character timestamp
    let timestamp = stem.get(0..19)?;
    let naive = chrono::NaiveDateTime::parse_from_str(timestamp, "%Y%m%d_%H%M%S_%3f").ok()?;
    Some(SystemTime::from(naive.and_utc()))
}
