mod aggregator;
mod feed;
mod snapshot;
mod stats;

pub use aggregator::{QueueTelemetry, Stage, TelemetryAggregator};
pub use feed::{StatusFeed, StatusUpdate};
pub use snapshot::{
    EvictionCounters, FrameTiming, MetricsSnapshot, NotificationCounters, QueueSnapshot, TelemetrySnapshot,
};
pub use stats::{FpsTracker, LatencyStats, LatencyWindow};
