use crate::config::{NotificationConfig, StorageConfig};
use crate::detection::{BoundingBox, Detection};
use crate::error::SinkError;
use crate::telemetry::{Stage, TelemetryAggregator};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// External message broker
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<(), SinkError>;

    fn describe(&self) -> String;
}

/// Posts `{topic, payload}` to an HTTP bridge in front of the broker
pub struct HttpBroker {
    client: reqwest::Client,
    url: String,
    credentials: Option<(String, Option<String>)>,
}

impl HttpBroker {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SinkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Connection {
                details: e.to_string(),
            })?;
        Ok(Self {
            client,
            url: url.into(),
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, username: String, password: Option<String>) -> Self {
        self.credentials = Some((username, password));
        self
    }
}

#[derive(Serialize)]
struct BridgeMessage<'a> {
    topic: &'a str,
    payload: &'a serde_json::Value,
}

#[async_trait]
impl Broker for HttpBroker {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<(), SinkError> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&BridgeMessage { topic, payload });
        if let Some((username, password)) = &self.credentials {
            request = request.basic_auth(username, password.as_ref());
        }

        let response = request.send().await.map_err(|e| SinkError::Publish {
            topic: topic.to_string(),
            details: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(SinkError::Publish {
                topic: topic.to_string(),
                details: format!("broker bridge returned {}", response.status()),
            });
        }
        Ok(())
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Logs messages instead of publishing; keeps what it saw for inspection
#[derive(Default)]
pub struct LogBroker {
    published: Mutex<Vec<(String, serde_json::Value)>>,
}

impl LogBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<(String, serde_json::Value)> {
        self.published.lock().clone()
    }
}

#[async_trait]
impl Broker for LogBroker {
    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<(), SinkError> {
        info!("[{}] {}", topic, payload);
        let mut published = self.published.lock();
        if published.len() >= 1000 {
            published.remove(0);
        }
        published.push((topic.to_string(), payload.clone()));
        Ok(())
    }

    fn describe(&self) -> String {
        "log".to_string()
    }
}

/// Message published for every accepted detection
#[derive(Debug, Clone, Serialize)]
pub struct DetectionPayload {
    pub id: Uuid,
    pub time: DateTime<Utc>,
    pub class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub camera: String,
    pub frame_sequence: u64,
}

/// Liveness message
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatPayload {
    pub timestamp: DateTime<Utc>,
    pub camera: String,
}

/// Publishes detections and heartbeats.
///
/// Publishing never blocks the caller: [`NotificationStage::spawn_notify`]
/// hands the publish to a task and drops the notification when too many are
/// already in flight.
pub struct NotificationStage {
    broker: Arc<dyn Broker>,
    topic: String,
    camera: String,
    publish_timeout: Duration,
    in_flight: Arc<Semaphore>,
    telemetry: Arc<TelemetryAggregator>,
}

impl NotificationStage {
    pub fn new(
        broker: Arc<dyn Broker>,
        config: &NotificationConfig,
        camera: impl Into<String>,
        telemetry: Arc<TelemetryAggregator>,
    ) -> Self {
        Self {
            broker,
            topic: config.topic.trim_end_matches('/').to_string(),
            camera: camera.into(),
            publish_timeout: config.publish_timeout(),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            telemetry,
        }
    }

    pub fn detection_topic(&self, class: &str) -> String {
        format!("{}/{}", self.topic, class)
    }

    pub fn heartbeat_topic(&self) -> String {
        format!("{}/ping", self.topic)
    }

    pub fn payload(&self, detection: &Detection) -> DetectionPayload {
        DetectionPayload {
            id: detection.id,
            time: detection.timestamp,
            class: detection.class.clone(),
            confidence: detection.confidence,
            bbox: detection.bbox,
            camera: self.camera.clone(),
            frame_sequence: detection.frame_sequence,
        }
    }

    /// Publish one detection and wait for the outcome
    pub async fn notify(&self, detection: &Detection) -> Result<(), SinkError> {
        let topic = self.detection_topic(&detection.class);
        let payload = serde_json::to_value(self.payload(detection)).map_err(|e| {
            SinkError::Encoding {
                details: e.to_string(),
            }
        })?;

        let started = Instant::now();
        let result = self.publish(&topic, &payload).await;
        self.telemetry.record_stage(Stage::Notify, started.elapsed());

        match &result {
            Ok(()) => {
                self.telemetry.record_notification_sent();
                debug!("Published detection {} to {}", detection.id, topic);
            }
            Err(e) => {
                self.telemetry.record_notification_failed();
                warn!("Notification for detection {} failed: {}", detection.id, e);
            }
        }
        result
    }

    /// Fire-and-forget publish; returns false when the notification was dropped
    pub fn spawn_notify(self: &Arc<Self>, detection: Detection) -> bool {
        let permit = match Arc::clone(&self.in_flight).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.telemetry.record_notification_dropped();
                debug!(
                    "Dropped notification for detection {}: publish limit reached",
                    detection.id
                );
                return false;
            }
        };

        let stage = Arc::clone(self);
        tokio::spawn(async move {
            let _ = stage.notify(&detection).await;
            drop(permit);
        });
        true
    }

    pub async fn heartbeat(&self) -> Result<(), SinkError> {
        let topic = self.heartbeat_topic();
        let payload = serde_json::to_value(HeartbeatPayload {
            timestamp: Utc::now(),
            camera: self.camera.clone(),
        })
        .map_err(|e| SinkError::Encoding {
            details: e.to_string(),
        })?;

        let result = self.publish(&topic, &payload).await;
        self.telemetry.record_heartbeat(result.is_ok());
        result
    }

    /// Publish a heartbeat every `interval` until cancelled
    pub async fn run_heartbeat(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        info!(
            "Heartbeat started on {} every {:?} via {}",
            self.heartbeat_topic(),
            interval,
            self.broker.describe()
        );
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(10)));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.heartbeat().await {
                        warn!("Heartbeat failed: {}", e);
                    }
                }
            }
        }

        info!("Heartbeat stopped");
    }

    async fn publish(&self, topic: &str, payload: &serde_json::Value) -> Result<(), SinkError> {
        match tokio::time::timeout(self.publish_timeout, self.broker.publish(topic, payload)).await {
            Ok(result) => result,
            Err(_) => Err(SinkError::PublishTimeout {
                topic: topic.to_string(),
                timeout: self.publish_timeout,
            }),
        }
    }
}

/// Broker for the configured url, or a logging broker when none is set
pub fn broker_from_config(config: &NotificationConfig) -> Result<Arc<dyn Broker>, SinkError> {
    match &config.broker_url {
        Some(url) => {
            let mut broker = HttpBroker::new(url, config.publish_timeout())?;
            if let Some(username) = &config.username {
                broker = broker.with_credentials(username.clone(), config.password.clone());
            }
            Ok(Arc::new(broker))
        }
        None => {
            info!("No broker configured, notifications are logged only");
            Ok(Arc::new(LogBroker::new()))
        }
    }
}

impl NotificationStage {
    pub fn from_config(
        broker: Arc<dyn Broker>,
        notification: &NotificationConfig,
        storage: &StorageConfig,
        telemetry: Arc<TelemetryAggregator>,
    ) -> Self {
        Self::new(broker, notification, storage.camera_name.clone(), telemetry)
    }
}
