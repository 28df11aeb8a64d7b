use serde::Serialize;
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Summary of a latency window in milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencyStats {
    pub last_ms: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub samples: usize,
}

/// Fixed-size window of recent durations
#[derive(Debug, Clone)]
pub struct LatencyWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl LatencyWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(duration.as_secs_f64() * 1000.0);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn stats(&self) -> LatencyStats {
        let Some(&last_ms) = self.samples.back() else {
            return LatencyStats::default();
        };

        let (sum, min_ms, max_ms) = self.samples.iter().fold(
            (0.0, f64::INFINITY, f64::NEG_INFINITY),
            |(sum, min, max), &v| (sum + v, min.min(v), max.max(v)),
        );

        LatencyStats {
            last_ms,
            avg_ms: sum / self.samples.len() as f64,
            min_ms,
            max_ms,
            samples: self.samples.len(),
        }
    }
}

/// Rolling frame rate over the last N frame arrivals
#[derive(Debug, Clone)]
pub struct FpsTracker {
    arrivals: VecDeque<Instant>,
    capacity: usize,
}

impl FpsTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            arrivals: VecDeque::with_capacity(capacity.max(2)),
            capacity: capacity.max(2),
        }
    }

    pub fn tick(&mut self, at: Instant) {
        if self.arrivals.len() == self.capacity {
            self.arrivals.pop_front();
        }
        self.arrivals.push_back(at);
    }

    /// Rate implied by the two most recent arrivals
    pub fn current(&self) -> f64 {
        let n = self.arrivals.len();
        if n < 2 {
            return 0.0;
        }
        rate(1, self.arrivals[n - 1].duration_since(self.arrivals[n - 2]))
    }

    /// Average rate across the whole window
    pub fn average(&self) -> f64 {
        match (self.arrivals.front(), self.arrivals.back()) {
            (Some(first), Some(last)) if self.arrivals.len() >= 2 => {
                rate(self.arrivals.len() - 1, last.duration_since(*first))
            }
            _ => 0.0,
        }
    }
}

fn rate(intervals: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        intervals as f64 / secs
    } else {
        0.0
    }
}
