use crate::error::SinkError;
use crate::telemetry::QueueTelemetry;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Writes dequeued items to their final destination
#[async_trait]
pub trait Sink<T: Send + 'static>: Send + Sync {
    fn name(&self) -> &str;

    async fn write(&self, item: T) -> Result<(), SinkError>;
}

/// Item plus the instant it entered the queue
#[derive(Debug)]
pub struct QueueItem<T> {
    pub item: T,
    pub enqueued_at: Instant,
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted,
    Dropped,
}

/// Producer side of a bounded persistence queue.
///
/// `enqueue` never waits longer than the configured timeout: a full queue is
/// retried once with a short bounded wait and the item is dropped and counted
/// if space still does not free up.
pub struct PersistenceQueue<T> {
    name: String,
    tx: mpsc::Sender<QueueItem<T>>,
    enqueue_timeout: Duration,
    telemetry: Arc<QueueTelemetry>,
}

impl<T> Clone for PersistenceQueue<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            enqueue_timeout: self.enqueue_timeout,
            telemetry: Arc::clone(&self.telemetry),
        }
    }
}

impl<T: Send + 'static> PersistenceQueue<T> {
    /// Create a queue and the worker that drains it into `sink`
    pub fn bounded(
        capacity: usize,
        enqueue_timeout: Duration,
        drain_timeout: Duration,
        sink: Arc<dyn Sink<T>>,
        telemetry: Arc<QueueTelemetry>,
    ) -> (Self, QueueWorker<T>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let name = telemetry.name().to_string();

        let queue = Self {
            name: name.clone(),
            tx,
            enqueue_timeout,
            telemetry: Arc::clone(&telemetry),
        };
        let worker = QueueWorker {
            name,
            rx,
            sink,
            telemetry,
            drain_timeout,
        };
        (queue, worker)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn telemetry(&self) -> &Arc<QueueTelemetry> {
        &self.telemetry
    }

    pub async fn enqueue(&self, item: T) -> EnqueueOutcome {
        let permit = match self.tx.try_reserve() {
            Ok(permit) => permit,
            Err(TrySendError::Full(())) if !self.enqueue_timeout.is_zero() => {
                match tokio::time::timeout(self.enqueue_timeout, self.tx.reserve()).await {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return self.drop_item("closed"),
                    Err(_) => return self.drop_item("full"),
                }
            }
            Err(TrySendError::Full(())) => return self.drop_item("full"),
            Err(TrySendError::Closed(())) => return self.drop_item("closed"),
        };

        self.telemetry.record_enqueued();
        permit.send(QueueItem {
            item,
            enqueued_at: Instant::now(),
        });
        EnqueueOutcome::Accepted
    }

    fn drop_item(&self, reason: &str) -> EnqueueOutcome {
        self.telemetry.record_dropped();
        debug!("Dropped item for {} queue ({})", self.name, reason);
        EnqueueOutcome::Dropped
    }
}

/// Totals for one worker run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: u64,
    pub failed: u64,
    pub abandoned: u64,
}

/// Consumer side; one worker per queue
pub struct QueueWorker<T> {
    name: String,
    rx: mpsc::Receiver<QueueItem<T>>,
    sink: Arc<dyn Sink<T>>,
    telemetry: Arc<QueueTelemetry>,
    drain_timeout: Duration,
}

impl<T: Send + 'static> QueueWorker<T> {
    /// Process items until cancelled, then drain what is left until the
    /// deadline. Items still queued after the deadline count as abandoned.
    pub async fn run(mut self, cancel: CancellationToken) -> WorkerReport {
        info!("{} queue worker started (sink: {})", self.name, self.sink.name());
        let mut report = WorkerReport::default();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.rx.recv() => match received {
                    Some(item) => self.handle(item, &mut report).await,
                    None => {
                        info!("{} queue closed by all producers", self.name);
                        return report;
                    }
                }
            }
        }

        self.rx.close();
        let deadline = Instant::now() + self.drain_timeout;
        let pending = self.rx.len();
        if pending > 0 {
            info!(
                "Draining {} queue ({} pending, deadline {:?})",
                self.name, pending, self.drain_timeout
            );
        }

        while let Ok(item) = self.rx.try_recv() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                report.abandoned += 1;
                break;
            }
            if tokio::time::timeout(remaining, self.handle(item, &mut report))
                .await
                .is_err()
            {
                report.abandoned += 1;
                break;
            }
        }

        while self.rx.try_recv().is_ok() {
            report.abandoned += 1;
        }

        if report.abandoned > 0 {
            warn!(
                "{} queue abandoned {} items at shutdown",
                self.name, report.abandoned
            );
            self.telemetry.record_abandoned(report.abandoned);
        }

        info!(
            "{} queue worker stopped: {} processed, {} failed, {} abandoned",
            self.name, report.processed, report.failed, report.abandoned
        );
        report
    }

    async fn handle(&self, queued: QueueItem<T>, report: &mut WorkerReport) {
        self.telemetry.record_dequeued(queued.enqueued_at.elapsed());

        let started = Instant::now();
        match self.sink.write(queued.item).await {
            Ok(()) => {
                self.telemetry.record_processed(started.elapsed());
                report.processed += 1;
            }
            Err(e) => {
                self.telemetry.record_failed(started.elapsed());
                report.failed += 1;
                error!("{} sink write failed: {}", self.name, e);
            }
        }
    }
}
