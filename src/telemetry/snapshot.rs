use super::stats::LatencyStats;
use crate::detection::Detection;
use crate::source::ConnectionState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Point-in-time copy of every telemetry counter
#[derive(Debug, Clone, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp: DateTime<Utc>,
    pub uptime_secs: f64,
    pub is_streaming: bool,
    pub connection_state: ConnectionState,
    pub last_frame_time: Option<DateTime<Utc>>,
    pub last_frame_sequence: Option<u64>,
    pub metrics: MetricsSnapshot,
    pub notifications: NotificationCounters,
    pub eviction: EvictionCounters,
    /// Per-stage latency keyed by stage name, plus queue waits and frame age
    pub timing: BTreeMap<String, LatencyStats>,
    pub queues: BTreeMap<String, QueueSnapshot>,
    pub recent_detections: Vec<Detection>,
}

/// Stage timings of one processed frame
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameTiming {
    pub sequence: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub read_ms: Option<f64>,
    pub resize_ms: Option<f64>,
    pub detection_ms: Option<f64>,
    pub total_ms: f64,
    pub frame_age_ms: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
    pub fps: f64,
    pub current_fps: f64,
    pub frames_captured: u64,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub detection_errors: u64,
    pub detections_total: u64,
    pub reconnects: u64,
    pub monitoring_snapshots: u64,
    pub avg_processing_ms: f64,
    pub min_processing_ms: f64,
    pub max_processing_ms: f64,
    pub frame_age: LatencyStats,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct NotificationCounters {
    pub sent: u64,
    pub failed: u64,
    pub dropped: u64,
    pub heartbeats_sent: u64,
    pub heartbeats_failed: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvictionCounters {
    pub runs: u64,
    pub files_deleted: u64,
    pub bytes_freed: u64,
    pub errors: u64,
    pub last_usage: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueSnapshot {
    pub capacity: usize,
    pub depth: usize,
    pub enqueued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
    pub abandoned: u64,
    pub wait_time: LatencyStats,
    pub processing_time: LatencyStats,
}
