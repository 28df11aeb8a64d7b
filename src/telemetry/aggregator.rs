use super::snapshot::{
    EvictionCounters, FrameTiming, MetricsSnapshot, NotificationCounters, QueueSnapshot, TelemetrySnapshot,
};
use super::stats::{FpsTracker, LatencyWindow};
use crate::detection::Detection;
use crate::eviction::EvictionReport;
use crate::frame::Frame;
use crate::source::ConnectionState;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::trace;

/// Timed stages of the frame path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Read,
    Resize,
    Detect,
    Notify,
    Reconnect,
    Total,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Read,
        Stage::Resize,
        Stage::Detect,
        Stage::Notify,
        Stage::Reconnect,
        Stage::Total,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Read => "frame_read",
            Stage::Resize => "resize",
            Stage::Detect => "detection",
            Stage::Notify => "notify",
            Stage::Reconnect => "reconnect",
            Stage::Total => "total",
        }
    }
}

/// Counters for one persistence queue, shared between the queue handle,
/// its worker and the aggregator
#[derive(Debug)]
pub struct QueueTelemetry {
    name: String,
    capacity: usize,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    processed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
    depth: AtomicUsize,
    wait_time: Mutex<LatencyWindow>,
    processing_time: Mutex<LatencyWindow>,
}

impl QueueTelemetry {
    pub fn new(name: impl Into<String>, capacity: usize, history: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            enqueued: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
            wait_time: Mutex::new(LatencyWindow::new(history)),
            processing_time: Mutex::new(LatencyWindow::new(history)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        self.depth.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dequeued(&self, wait: Duration) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| Some(d.saturating_sub(1)));
        self.wait_time.lock().record(wait);
    }

    pub fn record_processed(&self, elapsed: Duration) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.processing_time.lock().record(elapsed);
    }

    pub fn record_failed(&self, elapsed: Duration) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.processing_time.lock().record(elapsed);
    }

    pub fn record_abandoned(&self, count: u64) {
        self.abandoned.fetch_add(count, Ordering::Relaxed);
        let _ = self.depth.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
            Some(d.saturating_sub(count as usize))
        });
    }

    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            capacity: self.capacity,
            depth: self.depth(),
            enqueued: self.enqueued(),
            dropped: self.dropped(),
            processed: self.processed(),
            failed: self.failed(),
            abandoned: self.abandoned(),
            wait_time: self.wait_time.lock().stats(),
            processing_time: self.processing_time.lock().stats(),
        }
    }
}

#[derive(Debug, Default)]
struct FrameCounters {
    captured: AtomicU64,
    processed: AtomicU64,
    skipped: AtomicU64,
    detection_errors: AtomicU64,
    detections: AtomicU64,
    reconnects: AtomicU64,
    monitoring_snapshots: AtomicU64,
}

#[derive(Debug, Default)]
struct NotificationAtomics {
    sent: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
    heartbeats_sent: AtomicU64,
    heartbeats_failed: AtomicU64,
}

#[derive(Debug, Default)]
struct EvictionAtomics {
    runs: AtomicU64,
    files_deleted: AtomicU64,
    bytes_freed: AtomicU64,
    errors: AtomicU64,
    last_usage_bits: AtomicU64,
    has_usage: AtomicBool,
}

#[derive(Debug)]
struct StageTimings {
    stages: HashMap<Stage, LatencyWindow>,
    frame_age: LatencyWindow,
    /// Timings of the frame currently on the capture path
    current: FrameTiming,
    /// Finished frames, oldest first, at most `history` long
    per_frame: VecDeque<FrameTiming>,
}

fn millis(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

#[derive(Debug, Clone, Copy)]
struct LastFrame {
    timestamp: SystemTime,
    sequence: u64,
}

/// Process-wide counters and timers updated by every stage.
///
/// Each logical group sits behind its own atomic or short-lived lock. No
/// method holds a lock across I/O, and [`TelemetryAggregator::snapshot`]
/// copies values out before serializing.
#[derive(Debug)]
pub struct TelemetryAggregator {
    started_at: Instant,
    history: usize,
    frames: FrameCounters,
    notifications: NotificationAtomics,
    eviction: EvictionAtomics,
    streaming: AtomicBool,
    connection_state: Mutex<ConnectionState>,
    last_frame: Mutex<Option<LastFrame>>,
    fps: Mutex<FpsTracker>,
    timings: Mutex<StageTimings>,
    recent_detections: Mutex<VecDeque<Detection>>,
    recent_capacity: usize,
    queues: RwLock<Vec<Arc<QueueTelemetry>>>,
}

impl TelemetryAggregator {
    pub fn new(history: usize, recent_capacity: usize) -> Self {
        let history = history.max(1);
        let stages = Stage::ALL
            .iter()
            .map(|stage| (*stage, LatencyWindow::new(history)))
            .collect();

        Self {
            started_at: Instant::now(),
            history,
            frames: FrameCounters::default(),
            notifications: NotificationAtomics::default(),
            eviction: EvictionAtomics::default(),
            streaming: AtomicBool::new(false),
            connection_state: Mutex::new(ConnectionState::Disconnected),
            last_frame: Mutex::new(None),
            fps: Mutex::new(FpsTracker::new(history)),
            timings: Mutex::new(StageTimings {
                stages,
                frame_age: LatencyWindow::new(history),
                current: FrameTiming::default(),
                per_frame: VecDeque::with_capacity(history),
            }),
            recent_detections: Mutex::new(VecDeque::with_capacity(recent_capacity.max(1))),
            recent_capacity: recent_capacity.max(1),
            queues: RwLock::new(Vec::new()),
        }
    }

    /// Create and register counters for a persistence queue
    pub fn register_queue(&self, name: &str, capacity: usize) -> Arc<QueueTelemetry> {
        let queue = Arc::new(QueueTelemetry::new(name, capacity, self.history));
        self.queues.write().push(Arc::clone(&queue));
        queue
    }

    pub fn record_frame_captured(&self, frame: &Frame) {
        self.frames.captured.fetch_add(1, Ordering::Relaxed);
        self.fps.lock().tick(frame.captured_at);
        *self.last_frame.lock() = Some(LastFrame {
            timestamp: frame.timestamp,
            sequence: frame.sequence,
        });
        {
            let mut timings = self.timings.lock();
            timings.current.sequence = frame.sequence;
            timings.current.timestamp = Some(DateTime::<Utc>::from(frame.timestamp));
        }
        trace!("Frame {} captured", frame.sequence);
    }

    /// A captured frame made it through detection
    pub fn record_frame_processed(&self, total: Duration, frame_age: Duration) {
        self.frames.processed.fetch_add(1, Ordering::Relaxed);
        let mut timings = self.timings.lock();
        if let Some(window) = timings.stages.get_mut(&Stage::Total) {
            window.record(total);
        }
        timings.frame_age.record(frame_age);

        let mut entry = std::mem::take(&mut timings.current);
        entry.total_ms = millis(total);
        entry.frame_age_ms = millis(frame_age);
        if timings.per_frame.len() == self.history {
            timings.per_frame.pop_front();
        }
        timings.per_frame.push_back(entry);
    }

    /// A captured frame was abandoned before detection completed
    pub fn record_frame_skipped(&self) {
        self.frames.skipped.fetch_add(1, Ordering::Relaxed);
        self.timings.lock().current = FrameTiming::default();
    }

    pub fn record_stage(&self, stage: Stage, elapsed: Duration) {
        let mut timings = self.timings.lock();
        if let Some(window) = timings.stages.get_mut(&stage) {
            window.record(elapsed);
        }
        // Notify and reconnect run off the per-frame path
        let ms = Some(millis(elapsed));
        match stage {
            Stage::Read => timings.current.read_ms = ms,
            Stage::Resize => timings.current.resize_ms = ms,
            Stage::Detect => timings.current.detection_ms = ms,
            Stage::Notify | Stage::Reconnect | Stage::Total => {}
        }
    }

    /// Stage timings of the last processed frames, newest first
    pub fn timing_history(&self, limit: Option<usize>) -> Vec<FrameTiming> {
        let timings = self.timings.lock();
        let limit = limit.unwrap_or(timings.per_frame.len());
        timings.per_frame.iter().rev().take(limit).cloned().collect()
    }

    pub fn record_detection_error(&self) {
        self.frames.detection_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_detection(&self, detection: &Detection) {
        self.frames.detections.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent_detections.lock();
        if recent.len() == self.recent_capacity {
            recent.pop_front();
        }
        recent.push_back(detection.clone());
    }

    pub fn record_reconnect(&self) {
        self.frames.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_monitoring_snapshot(&self) {
        self.frames.monitoring_snapshots.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_connection_state(&self, state: ConnectionState) {
        self.streaming
            .store(state == ConnectionState::Streaming, Ordering::Relaxed);
        *self.connection_state.lock() = state;
    }

    pub fn record_notification_sent(&self) {
        self.notifications.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_failed(&self) {
        self.notifications.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_notification_dropped(&self) {
        self.notifications.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_heartbeat(&self, ok: bool) {
        if ok {
            self.notifications.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.notifications.heartbeats_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_eviction(&self, report: &EvictionReport) {
        self.eviction.runs.fetch_add(1, Ordering::Relaxed);
        self.eviction
            .files_deleted
            .fetch_add(report.files_deleted as u64, Ordering::Relaxed);
        self.eviction
            .bytes_freed
            .fetch_add(report.bytes_freed, Ordering::Relaxed);
        self.eviction
            .errors
            .fetch_add(report.errors as u64, Ordering::Relaxed);
        self.eviction
            .last_usage_bits
            .store(report.usage_after.to_bits(), Ordering::Relaxed);
        self.eviction.has_usage.store(true, Ordering::Relaxed);
    }

    pub fn record_eviction_error(&self) {
        self.eviction.runs.fetch_add(1, Ordering::Relaxed);
        self.eviction.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_captured(&self) -> u64 {
        self.frames.captured.load(Ordering::Relaxed)
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames.processed.load(Ordering::Relaxed)
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames.skipped.load(Ordering::Relaxed)
    }

    pub fn detection_errors(&self) -> u64 {
        self.frames.detection_errors.load(Ordering::Relaxed)
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::Relaxed)
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.lock()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let (fps, current_fps) = {
            let tracker = self.fps.lock();
            (tracker.average(), tracker.current())
        };

        let (mut timing, total, frame_age) = {
            let timings = self.timings.lock();
            let timing: BTreeMap<String, _> = timings
                .stages
                .iter()
                .map(|(stage, window)| (stage.as_str().to_string(), window.stats()))
                .collect();
            let total = timings
                .stages
                .get(&Stage::Total)
                .map(|w| w.stats())
                .unwrap_or_default();
            (timing, total, timings.frame_age.stats())
        };
        timing.insert("frame_age".to_string(), frame_age);

        let queues: BTreeMap<String, QueueSnapshot> = self
            .queues
            .read()
            .iter()
            .map(|queue| (queue.name().to_string(), queue.snapshot()))
            .collect();
        for (name, queue) in &queues {
            timing.insert(format!("{}_queue_wait", name), queue.wait_time);
        }

        let last_frame = *self.last_frame.lock();
        let recent_detections: Vec<Detection> =
            self.recent_detections.lock().iter().cloned().collect();

        let last_usage = if self.eviction.has_usage.load(Ordering::Relaxed) {
            Some(f64::from_bits(
                self.eviction.last_usage_bits.load(Ordering::Relaxed),
            ))
        } else {
            None
        };

        TelemetrySnapshot {
            timestamp: Utc::now(),
            uptime_secs: self.uptime().as_secs_f64(),
            is_streaming: self.is_streaming(),
            connection_state: self.connection_state(),
            last_frame_time: last_frame.map(|f| DateTime::<Utc>::from(f.timestamp)),
            last_frame_sequence: last_frame.map(|f| f.sequence),
            metrics: MetricsSnapshot {
                fps,
                current_fps,
                frames_captured: self.frames_captured(),
                frames_processed: self.frames_processed(),
                frames_skipped: self.frames_skipped(),
                detection_errors: self.detection_errors(),
                detections_total: self.frames.detections.load(Ordering::Relaxed),
                reconnects: self.frames.reconnects.load(Ordering::Relaxed),
                monitoring_snapshots: self.frames.monitoring_snapshots.load(Ordering::Relaxed),
                avg_processing_ms: total.avg_ms,
                min_processing_ms: total.min_ms,
                max_processing_ms: total.max_ms,
                frame_age,
            },
            notifications: NotificationCounters {
                sent: self.notifications.sent.load(Ordering::Relaxed),
                failed: self.notifications.failed.load(Ordering::Relaxed),
                dropped: self.notifications.dropped.load(Ordering::Relaxed),
                heartbeats_sent: self.notifications.heartbeats_sent.load(Ordering::Relaxed),
                heartbeats_failed: self.notifications.heartbeats_failed.load(Ordering::Relaxed),
            },
            eviction: EvictionCounters {
                runs: self.eviction.runs.load(Ordering::Relaxed),
                files_deleted: self.eviction.files_deleted.load(Ordering::Relaxed),
                bytes_freed: self.eviction.bytes_freed.load(Ordering::Relaxed),
                errors: self.eviction.errors.load(Ordering::Relaxed),
                last_usage,
            },
            timing,
            queues,
            recent_detections,
        }
    }
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new(100, 100)
    }
}
