use super::*;
use crate::error::SinkError;
use crate::telemetry::{QueueTelemetry, TelemetryAggregator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::RgbImage;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Blocks every write until released
struct GatedSink {
    gate: Arc<Notify>,
    writes: AtomicU32,
}

#[async_trait]
impl Sink<u32> for GatedSink {
    fn name(&self) -> &str {
        "gated"
    }

    async fn write(&self, _item: u32) -> Result<(), SinkError> {
        self.gate.notified().await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FailingSink {
    attempts: AtomicU32,
}

#[async_trait]
impl Sink<u32> for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    async fn write(&self, _item: u32) -> Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(SinkError::Insert {
            details: "connection reset".to_string(),
        })
    }
}

struct SlowSink {
    delay: Duration,
    writes: AtomicU32,
}

#[async_trait]
impl Sink<u32> for SlowSink {
    fn name(&self) -> &str {
        "slow"
    }

    async fn write(&self, _item: u32) -> Result<(), SinkError> {
        tokio::time::sleep(self.delay).await;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn queue_telemetry(name: &str, capacity: usize) -> Arc<QueueTelemetry> {
    Arc::new(QueueTelemetry::new(name, capacity, 16))
}

fn fixed_time() -> SystemTime {
    // 2024-03-05 06:07:08.009 UTC
    UNIX_EPOCH + Duration::from_millis(1_709_618_828_009)
}

#[tokio::test]
async fn test_full_queue_drops_overflow_without_blocking() {
    let telemetry = queue_telemetry("test", 3);
    let sink = Arc::new(GatedSink {
        gate: Arc::new(Notify::new()),
        writes: AtomicU32::new(0),
    });
    let timeout = Duration::from_millis(20);
    // Worker is never started so nothing drains
    let (queue, _worker) = PersistenceQueue::<u32>::bounded(
        3,
        timeout,
        Duration::from_secs(1),
        sink,
        Arc::clone(&telemetry),
    );

    let mut accepted = 0;
    let mut dropped = 0;
    for i in 0..8 {
        let started = Instant::now();
        match queue.enqueue(i).await {
            EnqueueOutcome::Accepted => accepted += 1,
            EnqueueOutcome::Dropped => dropped += 1,
        }
        assert!(started.elapsed() < timeout + Duration::from_millis(500));
    }

    assert_eq!(accepted, 3);
    assert_eq!(dropped, 5);
    assert_eq!(telemetry.enqueued(), 3);
    assert_eq!(telemetry.dropped(), 5);
    assert_eq!(telemetry.depth(), 3);
}

#[tokio::test]
async fn test_full_queue_accepts_when_space_frees_within_timeout() {
    let telemetry = queue_telemetry("test", 1);
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(5),
        writes: AtomicU32::new(0),
    });
    let (queue, worker) = PersistenceQueue::<u32>::bounded(
        1,
        Duration::from_millis(500),
        Duration::from_secs(1),
        sink.clone(),
        Arc::clone(&telemetry),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(worker.run(cancel.clone()));

    for i in 0..4 {
        assert_eq!(queue.enqueue(i).await, EnqueueOutcome::Accepted);
    }
    drop(queue);

    let report = handle.await.unwrap();
    assert_eq!(report.processed, 4);
    assert_eq!(sink.writes.load(Ordering::SeqCst), 4);
    assert_eq!(telemetry.dropped(), 0);
}

#[tokio::test]
async fn test_failing_sink_does_not_stop_worker() {
    let telemetry = queue_telemetry("test", 16);
    let sink = Arc::new(FailingSink {
        attempts: AtomicU32::new(0),
    });
    let (queue, worker) = PersistenceQueue::<u32>::bounded(
        16,
        Duration::from_millis(50),
        Duration::from_secs(1),
        sink.clone(),
        Arc::clone(&telemetry),
    );
    let handle = tokio::spawn(worker.run(CancellationToken::new()));

    for i in 0..5 {
        queue.enqueue(i).await;
    }
    drop(queue);

    let report = handle.await.unwrap();
    assert_eq!(report.failed, 5);
    assert_eq!(report.processed, 0);
    assert_eq!(sink.attempts.load(Ordering::SeqCst), 5);
    assert_eq!(telemetry.failed(), 5);
    assert_eq!(telemetry.depth(), 0);
}

#[tokio::test]
async fn test_drain_deadline_abandons_leftovers() {
    let telemetry = queue_telemetry("test", 16);
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(40),
        writes: AtomicU32::new(0),
    });
    let (queue, worker) = PersistenceQueue::<u32>::bounded(
        16,
        Duration::from_millis(10),
        Duration::from_millis(100),
        sink.clone(),
        Arc::clone(&telemetry),
    );

    for i in 0..10 {
        assert_eq!(queue.enqueue(i).await, EnqueueOutcome::Accepted);
    }

    // Cancelled before it starts, so everything goes through the drain path
    let cancel = CancellationToken::new();
    cancel.cancel();
    let started = Instant::now();
    let report = worker.run(cancel).await;

    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(report.processed >= 1);
    assert!(report.abandoned >= 1);
    assert_eq!(report.processed + report.abandoned, 10);
    assert_eq!(telemetry.abandoned(), report.abandoned);

    // Producers see a closed queue after shutdown
    assert_eq!(queue.enqueue(99).await, EnqueueOutcome::Dropped);
}

#[tokio::test]
async fn test_drain_completes_small_backlog() {
    let telemetry = queue_telemetry("test", 8);
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(1),
        writes: AtomicU32::new(0),
    });
    let (queue, worker) = PersistenceQueue::<u32>::bounded(
        8,
        Duration::from_millis(10),
        Duration::from_secs(2),
        sink.clone(),
        Arc::clone(&telemetry),
    );
    for i in 0..3 {
        queue.enqueue(i).await;
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = worker.run(cancel).await;

    assert_eq!(report.processed, 3);
    assert_eq!(report.abandoned, 0);
    assert_eq!(sink.writes.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_database_sink_round_trip() {
    let store = Arc::new(MemoryRecordStore::new(10));
    let sink = DatabaseSink::new(
        store.clone(),
        RecordEncoding {
            camera_name: "cam_garten".to_string(),
            jpeg_quality: 90,
            thumbnail_width: 300,
            thumbnail_quality: 85,
        },
    );

    sink.write(SnapshotJob {
        image: Arc::new(RgbImage::new(640, 480)),
        accuracy: 0.87,
        captured_at: fixed_time(),
    })
    .await
    .unwrap();

    let record = store.fetch(1).await.unwrap().unwrap();
    assert_eq!(record.camera_name, "cam_garten");
    assert_eq!(record.accuracy, 0.87);
    assert_eq!(record.created_at, DateTime::<Utc>::from(fixed_time()));
    assert!(!record.is_monitoring_snapshot());

    let full = image::load_from_memory(&record.image_jpeg).unwrap();
    assert_eq!((full.width(), full.height()), (640, 480));
    let thumb = image::load_from_memory(&record.thumbnail_jpeg).unwrap();
    assert_eq!((thumb.width(), thumb.height()), (300, 225));
}

#[tokio::test]
async fn test_record_timestamp_is_millisecond_precision() {
    let store = Arc::new(MemoryRecordStore::new(10));
    let sink = DatabaseSink::new(
        store.clone(),
        RecordEncoding {
            camera_name: "cam_garten".to_string(),
            jpeg_quality: 80,
            thumbnail_width: 16,
            thumbnail_quality: 80,
        },
    );

    let captured_at = fixed_time() + Duration::from_nanos(456_789);
    sink.write(SnapshotJob {
        image: Arc::new(RgbImage::new(32, 24)),
        accuracy: 0.5,
        captured_at,
    })
    .await
    .unwrap();

    let record = store.fetch(1).await.unwrap().unwrap();
    assert_eq!(record.created_at, DateTime::<Utc>::from(fixed_time()));
    assert_eq!(record.created_at.timestamp_subsec_nanos() % 1_000_000, 0);
}

#[tokio::test]
async fn test_memory_store_is_bounded() {
    let store = MemoryRecordStore::new(2);
    let record = StorageRecord {
        camera_name: "cam".to_string(),
        accuracy: 0.0,
        image_jpeg: vec![1, 2, 3],
        thumbnail_jpeg: vec![4],
        created_at: Utc::now(),
    };

    let first = store.insert(&record).await.unwrap();
    store.insert(&record).await.unwrap();
    let third = store.insert(&record).await.unwrap();

    assert_eq!(store.len(), 2);
    assert!(store.fetch(first).await.unwrap().is_none());
    let latest = store.fetch(third).await.unwrap().unwrap();
    assert_eq!(latest, record);
    assert!(latest.is_monitoring_snapshot());
}

#[tokio::test]
async fn test_file_sink_commits_named_jpeg() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileSink::new(dir.path(), 90);
    let request = FileWriteRequest {
        image: Arc::new(RgbImage::new(32, 24)),
        captured_at: fixed_time(),
    };

    sink.write(request.clone()).await.unwrap();
    sink.write(request).await.unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();

    assert_eq!(
        names,
        vec![
            "frame_20240305_060708_009.jpg".to_string(),
            "frame_20240305_060708_009_1.jpg".to_string(),
        ]
    );
    let bytes = std::fs::read(dir.path().join(&names[0])).unwrap();
    assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
}

#[test]
fn test_artifact_name_round_trip() {
    let stem = artifact_stem(fixed_time());
    assert_eq!(stem, "frame_20240305_060708_009");

    assert_eq!(
        parse_artifact_timestamp("frame_20240305_060708_009.jpg"),
        Some(fixed_time())
    );
    assert_eq!(
        parse_artifact_timestamp("frame_20240305_060708_009_2.jpg"),
        Some(fixed_time())
    );
    assert_eq!(parse_artifact_timestamp("frame_20240305_060708_009.jpg.partial"), None);
    assert_eq!(parse_artifact_timestamp("notes.jpg"), None);
}

#[tokio::test]
async fn test_queue_counters_reach_aggregator() {
    let aggregator = TelemetryAggregator::default();
    let telemetry = aggregator.register_queue(FILE_QUEUE, 2);
    let sink = Arc::new(SlowSink {
        delay: Duration::from_millis(1),
        writes: AtomicU32::new(0),
    });
    let (queue, worker) = PersistenceQueue::<u32>::bounded(
        2,
        Duration::from_millis(10),
        Duration::from_secs(1),
        sink,
        telemetry,
    );
    queue.enqueue(1).await;
    drop(queue);
    worker.run(CancellationToken::new()).await;

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.queues[FILE_QUEUE].processed, 1);
    assert_eq!(snapshot.queues[FILE_QUEUE].wait_time.samples, 1);
}
