use crate::hardware::DeviceClass;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CatwatchConfig {
    pub stream: StreamConfig,
    pub detection: DetectionConfig,
    pub storage: StorageConfig,
    pub notification: NotificationConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StreamConfig {
    /// RTSP stream URL (`test://pattern` selects the synthetic source)
    #[serde(default = "default_stream_url")]
    pub url: String,

    /// RTSP lower transport
    #[serde(default)]
    pub transport: RtspTransport,

    /// Continuous connection or one connection per frame
    #[serde(default)]
    pub connection_mode: ConnectionMode,

    /// Disable jitter buffering on the RTSP source
    #[serde(default = "default_low_delay")]
    pub low_delay: bool,

    /// Upper bound for establishing a connection (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound for waiting on a single frame (milliseconds)
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    /// Consecutive failed connects tolerated before giving up
    #[serde(default = "default_max_connect_retries")]
    pub max_connect_retries: u32,

    /// First reconnect delay (milliseconds)
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Reconnect delay cap (milliseconds)
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Growth factor applied to the reconnect delay
    #[serde(default = "default_retry_multiplier")]
    pub retry_multiplier: f64,

    /// Frames larger than this are downscaled before detection (width, height)
    #[serde(default = "default_max_resolution")]
    pub max_resolution: (u32, u32),
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectionConfig {
    /// Inference endpoint receiving JPEG frames
    #[serde(default = "default_detection_endpoint")]
    pub endpoint: String,

    /// Per-request timeout for the inference endpoint (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Minimum accepted confidence
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Normalized (x_min, y_min, x_max, y_max) region whose detections are ignored
    pub ignore_zone: Option<[f32; 4]>,

    /// How a box is matched against the ignore zone
    #[serde(default)]
    pub ignore_zone_mode: IgnoreZoneMode,

    /// Accepted class labels (empty accepts every class)
    #[serde(default = "default_target_classes")]
    pub target_classes: Vec<String>,

    /// Explicit model name, bypassing hardware based selection
    pub model: Option<String>,

    /// Device class override for model selection
    pub hardware_type: Option<DeviceClass>,

    /// Draw accepted boxes onto stored detection images
    #[serde(default = "default_annotate")]
    pub annotate: bool,

    /// TrueType font used for box labels
    pub font_path: Option<String>,

    /// Label font size
    #[serde(default = "default_font_size")]
    pub font_size: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct StorageConfig {
    /// Camera identifier written with every record and notification
    #[serde(default = "default_camera_name")]
    pub camera_name: String,

    /// Directory receiving detection JPEGs
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Disk usage fraction that triggers eviction
    #[serde(default = "default_usage_threshold")]
    pub usage_threshold: f64,

    /// Seconds between eviction checks
    #[serde(default = "default_eviction_interval_secs")]
    pub eviction_interval_secs: u64,

    /// MySQL connection URL; records are kept in memory when unset
    pub database_url: Option<String>,

    /// Records retained by the in-memory store
    #[serde(default = "default_memory_store_capacity")]
    pub memory_store_capacity: usize,

    /// Thumbnail width in pixels
    #[serde(default = "default_thumbnail_width")]
    pub thumbnail_width: u32,

    /// Thumbnail JPEG quality
    #[serde(default = "default_thumbnail_quality")]
    pub thumbnail_quality: u8,

    /// Full image JPEG quality
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Maximum depth of each persistence queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Longest time the capture loop waits on a full queue (milliseconds)
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,

    /// Shutdown drain deadline per queue (seconds)
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NotificationConfig {
    /// HTTP broker bridge URL; messages are only logged when unset
    pub broker_url: Option<String>,

    /// Topic prefix for detections and heartbeats
    #[serde(default = "default_topic")]
    pub topic: String,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Seconds between heartbeat publishes
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Per-publish timeout (milliseconds)
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Concurrent publishes before new notifications are dropped
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MonitoringConfig {
    /// Serve the live status API
    #[serde(default = "default_monitoring_enabled")]
    pub enabled: bool,

    /// IP address to bind to
    #[serde(default = "default_monitoring_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_monitoring_port")]
    pub port: u16,

    /// Status feed tick (milliseconds)
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,

    /// Capacity of the recent detections ring
    #[serde(default = "default_recent_detections")]
    pub recent_detections: usize,

    /// Samples kept per latency window
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// JPEG quality for the current frame endpoint
    #[serde(default = "default_frame_jpeg_quality")]
    pub frame_jpeg_quality: u8,

    /// Buffered updates per push subscriber
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RtspTransport {
    #[default]
    Udp,
    Tcp,
}

impl RtspTransport {
    pub fn as_str(&self) -> &'static str {
        match self {
            RtspTransport::Udp => "udp",
            RtspTransport::Tcp => "tcp",
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    #[default]
    Continuous,
    ReconnectPerFrame,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IgnoreZoneMode {
    /// Reject when the box center lies inside the zone
    #[default]
    Center,
    /// Reject when the box intersects the zone at all
    Overlap,
}

impl CatwatchConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("catwatch.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("stream.url", default_stream_url())?
            .set_default("stream.transport", "udp")?
            .set_default("stream.connection_mode", "continuous")?
            .set_default("stream.low_delay", default_low_delay())?
            .set_default("stream.connect_timeout_ms", default_connect_timeout_ms())?
            .set_default("stream.read_timeout_ms", default_read_timeout_ms())?
            .set_default("stream.max_connect_retries", default_max_connect_retries())?
            .set_default("stream.retry_base_delay_ms", default_retry_base_delay_ms())?
            .set_default("stream.retry_max_delay_ms", default_retry_max_delay_ms())?
            .set_default("stream.retry_multiplier", default_retry_multiplier())?
            .set_default(
                "stream.max_resolution",
                vec![default_max_resolution().0, default_max_resolution().1],
            )?
            .set_default("detection.endpoint", default_detection_endpoint())?
            .set_default("detection.request_timeout_ms", default_request_timeout_ms())?
            .set_default(
                "detection.confidence_threshold",
                default_confidence_threshold() as f64,
            )?
            .set_default("detection.ignore_zone_mode", "center")?
            .set_default("detection.target_classes", default_target_classes())?
            .set_default("detection.annotate", default_annotate())?
            .set_default("detection.font_size", default_font_size() as f64)?
            .set_default("storage.camera_name", default_camera_name())?
            .set_default("storage.output_dir", default_output_dir())?
            .set_default("storage.usage_threshold", default_usage_threshold())?
            .set_default(
                "storage.eviction_interval_secs",
                default_eviction_interval_secs(),
            )?
            .set_default(
                "storage.memory_store_capacity",
                default_memory_store_capacity() as i64,
            )?
            .set_default("storage.thumbnail_width", default_thumbnail_width())?
            .set_default("storage.thumbnail_quality", default_thumbnail_quality())?
            .set_default("storage.jpeg_quality", default_jpeg_quality())?
            .set_default("storage.queue_capacity", default_queue_capacity() as i64)?
            .set_default("storage.enqueue_timeout_ms", default_enqueue_timeout_ms())?
            .set_default("storage.drain_timeout_secs", default_drain_timeout_secs())?
            .set_default("notification.topic", default_topic())?
            .set_default(
                "notification.heartbeat_interval_secs",
                default_heartbeat_interval_secs(),
            )?
            .set_default(
                "notification.publish_timeout_ms",
                default_publish_timeout_ms(),
            )?
            .set_default("notification.max_in_flight", default_max_in_flight() as i64)?
            .set_default("monitoring.enabled", default_monitoring_enabled())?
            .set_default("monitoring.ip", default_monitoring_ip())?
            .set_default("monitoring.port", default_monitoring_port())?
            .set_default(
                "monitoring.update_interval_ms",
                default_update_interval_ms(),
            )?
            .set_default(
                "monitoring.recent_detections",
                default_recent_detections() as i64,
            )?
            .set_default("monitoring.history_size", default_history_size() as i64)?
            .set_default(
                "monitoring.frame_jpeg_quality",
                default_frame_jpeg_quality(),
            )?
            .set_default(
                "monitoring.subscriber_buffer",
                default_subscriber_buffer() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // CATWATCH_STREAM__URL, CATWATCH_DETECTION__IGNORE_ZONE=0.0,0.0,0.2,0.2
            .add_source(
                Environment::with_prefix("CATWATCH")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("detection.ignore_zone")
                    .with_list_parse_key("detection.target_classes")
                    .with_list_parse_key("stream.max_resolution"),
            )
            .build()?;

        let config: CatwatchConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.url.trim().is_empty() {
            return Err(ConfigError::Message(
                "Stream url must not be empty".to_string(),
            ));
        }

        if self.stream.connect_timeout_ms == 0 || self.stream.read_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Stream timeouts must be greater than 0".to_string(),
            ));
        }

        if self.stream.retry_multiplier < 1.0 {
            return Err(ConfigError::Message(
                "Stream retry_multiplier must be at least 1.0".to_string(),
            ));
        }

        if self.stream.retry_base_delay_ms > self.stream.retry_max_delay_ms {
            return Err(ConfigError::Message(
                "Stream retry_base_delay_ms must not exceed retry_max_delay_ms".to_string(),
            ));
        }

        if self.stream.max_resolution.0 == 0 || self.stream.max_resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Stream max_resolution must be greater than 0".to_string(),
            ));
        }

        let threshold = self.detection.confidence_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::Message(format!(
                "Detection confidence_threshold must be in (0, 1], got {}",
                threshold
            )));
        }

        if let Some(zone) = self.detection.ignore_zone {
            if zone.iter().any(|v| !(0.0..=1.0).contains(v)) {
                return Err(ConfigError::Message(
                    "Detection ignore_zone coordinates must be in [0, 1]".to_string(),
                ));
            }
            if zone[0] >= zone[2] || zone[1] >= zone[3] {
                return Err(ConfigError::Message(
                    "Detection ignore_zone must satisfy x_min < x_max and y_min < y_max"
                        .to_string(),
                ));
            }
        }

        let usage = self.storage.usage_threshold;
        if !(usage > 0.0 && usage <= 1.0) {
            return Err(ConfigError::Message(format!(
                "Storage usage_threshold must be in (0, 1], got {}",
                usage
            )));
        }

        if self.storage.queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Storage queue_capacity must be greater than 0".to_string(),
            ));
        }

        if self.storage.thumbnail_width == 0 {
            return Err(ConfigError::Message(
                "Storage thumbnail_width must be greater than 0".to_string(),
            ));
        }

        if self.storage.eviction_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Storage eviction_interval_secs must be greater than 0".to_string(),
            ));
        }

        for (name, quality) in [
            ("storage.jpeg_quality", self.storage.jpeg_quality),
            ("storage.thumbnail_quality", self.storage.thumbnail_quality),
            ("monitoring.frame_jpeg_quality", self.monitoring.frame_jpeg_quality),
        ] {
            if !(1..=100).contains(&quality) {
                return Err(ConfigError::Message(format!(
                    "{} must be between 1 and 100",
                    name
                )));
            }
        }

        if self.notification.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Message(
                "Notification heartbeat_interval_secs must be greater than 0".to_string(),
            ));
        }

        if self.notification.max_in_flight == 0 {
            return Err(ConfigError::Message(
                "Notification max_in_flight must be greater than 0".to_string(),
            ));
        }

        if self.monitoring.update_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Monitoring update_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.monitoring.recent_detections == 0 || self.monitoring.history_size == 0 {
            return Err(ConfigError::Message(
                "Monitoring recent_detections and history_size must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }
}

impl StreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl StorageConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn eviction_interval(&self) -> Duration {
        Duration::from_secs(self.eviction_interval_secs)
    }
}

impl NotificationConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            transport: RtspTransport::default(),
            connection_mode: ConnectionMode::default(),
            low_delay: default_low_delay(),
            connect_timeout_ms: default_connect_timeout_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            max_connect_retries: default_max_connect_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            retry_multiplier: default_retry_multiplier(),
            max_resolution: default_max_resolution(),
        }
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_detection_endpoint(),
            request_timeout_ms: default_request_timeout_ms(),
            confidence_threshold: default_confidence_threshold(),
            ignore_zone: None,
            ignore_zone_mode: IgnoreZoneMode::default(),
            target_classes: default_target_classes(),
            model: None,
            hardware_type: None,
            annotate: default_annotate(),
            font_path: None,
            font_size: default_font_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            camera_name: default_camera_name(),
            output_dir: default_output_dir(),
            usage_threshold: default_usage_threshold(),
            eviction_interval_secs: default_eviction_interval_secs(),
            database_url: None,
            memory_store_capacity: default_memory_store_capacity(),
            thumbnail_width: default_thumbnail_width(),
            thumbnail_quality: default_thumbnail_quality(),
            jpeg_quality: default_jpeg_quality(),
            queue_capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            broker_url: None,
            topic: default_topic(),
            username: None,
            password: None,
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            publish_timeout_ms: default_publish_timeout_ms(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: default_monitoring_enabled(),
            ip: default_monitoring_ip(),
            port: default_monitoring_port(),
            update_interval_ms: default_update_interval_ms(),
            recent_detections: default_recent_detections(),
            history_size: default_history_size(),
            frame_jpeg_quality: default_frame_jpeg_quality(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

impl Default for CatwatchConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            detection: DetectionConfig::default(),
            storage: StorageConfig::default(),
            notification: NotificationConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

// Default value functions
fn default_stream_url() -> String {
    "rtsp://127.0.0.1:8554/stream".to_string()
}
fn default_low_delay() -> bool {
    true
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_read_timeout_ms() -> u64 {
    5000
}
fn default_max_connect_retries() -> u32 {
    20
}
fn default_retry_base_delay_ms() -> u64 {
    2000
}
fn default_retry_max_delay_ms() -> u64 {
    30_000
}
fn default_retry_multiplier() -> f64 {
    1.5
}
fn default_max_resolution() -> (u32, u32) {
    (1920, 1080)
}

fn default_detection_endpoint() -> String {
    "http://127.0.0.1:8000/v1/detect".to_string()
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_confidence_threshold() -> f32 {
    0.5
}
fn default_target_classes() -> Vec<String> {
    vec!["cat".to_string()]
}
fn default_annotate() -> bool {
    true
}
fn default_font_size() -> f32 {
    18.0
}

fn default_camera_name() -> String {
    "cam_garten".to_string()
}
fn default_output_dir() -> String {
    "./detections".to_string()
}
fn default_usage_threshold() -> f64 {
    0.8
}
fn default_eviction_interval_secs() -> u64 {
    60
}
fn default_memory_store_capacity() -> usize {
    1000
}
fn default_thumbnail_width() -> u32 {
    300
}
fn default_thumbnail_quality() -> u8 {
    85
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_queue_capacity() -> usize {
    32
}
fn default_enqueue_timeout_ms() -> u64 {
    50
}
fn default_drain_timeout_secs() -> u64 {
    5
}

fn default_topic() -> String {
    "catwatch".to_string()
}
fn default_heartbeat_interval_secs() -> u64 {
    30
}
fn default_publish_timeout_ms() -> u64 {
    2000
}
fn default_max_in_flight() -> usize {
    8
}

fn default_monitoring_enabled() -> bool {
    true
}
fn default_monitoring_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_monitoring_port() -> u16 {
    8080
}
fn default_update_interval_ms() -> u64 {
    500
}
fn default_recent_detections() -> usize {
    100
}
fn default_history_size() -> usize {
    100
}
fn default_frame_jpeg_quality() -> u8 {
    75
}
fn default_subscriber_buffer() -> usize {
    16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = CatwatchConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream.transport, RtspTransport::Udp);
        assert_eq!(config.stream.connection_mode, ConnectionMode::Continuous);
        assert_eq!(config.storage.thumbnail_width, 300);
        assert_eq!(config.monitoring.port, 8080);
    }

    #[test]
    fn test_config_validation() {
        let mut config = CatwatchConfig::default();

        config.detection.confidence_threshold = 0.0;
        assert!(config.validate().is_err());
        config.detection.confidence_threshold = 0.5;

        config.detection.ignore_zone = Some([0.3, 0.0, 0.2, 0.2]);
        assert!(config.validate().is_err());
        config.detection.ignore_zone = Some([0.0, 0.0, 1.2, 0.2]);
        assert!(config.validate().is_err());
        config.detection.ignore_zone = Some([0.0, 0.0, 0.2, 0.2]);
        assert!(config.validate().is_ok());

        config.storage.usage_threshold = 1.5;
        assert!(config.validate().is_err());
        config.storage.usage_threshold = 0.8;

        config.storage.queue_capacity = 0;
        assert!(config.validate().is_err());
        config.storage.queue_capacity = 4;

        config.monitoring.frame_jpeg_quality = 0;
        assert!(config.validate().is_err());
        config.monitoring.frame_jpeg_quality = 75;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[stream]
url = "rtsp://camera.local/live"
transport = "tcp"
connection_mode = "reconnect_per_frame"

[detection]
confidence_threshold = 0.6
ignore_zone = [0.0, 0.0, 0.2, 0.2]
ignore_zone_mode = "overlap"
hardware_type = "jetson"

[storage]
queue_capacity = 8
"#
        )
        .unwrap();

        let config = CatwatchConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.stream.url, "rtsp://camera.local/live");
        assert_eq!(config.stream.transport, RtspTransport::Tcp);
        assert_eq!(config.stream.connection_mode, ConnectionMode::ReconnectPerFrame);
        assert!((config.detection.confidence_threshold - 0.6).abs() < f32::EPSILON);
        assert_eq!(config.detection.ignore_zone, Some([0.0, 0.0, 0.2, 0.2]));
        assert_eq!(config.detection.ignore_zone_mode, IgnoreZoneMode::Overlap);
        assert_eq!(config.detection.hardware_type, Some(DeviceClass::Jetson));
        assert_eq!(config.storage.queue_capacity, 8);
        // Untouched sections keep their defaults
        assert_eq!(config.notification.heartbeat_interval_secs, 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_environment_variable_override() {
        env::set_var("CATWATCH_NOTIFICATION__TOPIC", "garden/cats");

        let config = CatwatchConfig::load_from_file("does-not-exist.toml").unwrap();
        assert_eq!(config.notification.topic, "garden/cats");

        env::remove_var("CATWATCH_NOTIFICATION__TOPIC");
    }
}
