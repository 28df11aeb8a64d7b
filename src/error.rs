use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CatwatchError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl CatwatchError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// True when the error ends the current run and needs a process restart
    pub fn is_fatal(&self) -> bool {
        match self {
            CatwatchError::Stream(e) => e.is_fatal(),
            _ => false,
        }
    }
}

/// Errors raised while connecting to or reading from the video stream
#[derive(Error, Debug, Clone)]
pub enum StreamError {
    #[error("Failed to connect to {url}: {details}")]
    ConnectFailed { url: String, details: String },

    #[error("Connect to {url} timed out after {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("Frame read failed: {details}")]
    ReadFailed { details: String },

    #[error("No frame received within {timeout:?}")]
    ReadTimeout { timeout: Duration },

    #[error("Stream pipeline error: {details}")]
    Pipeline { details: String },

    #[error("Source is not open")]
    NotOpen,

    #[error("Retry budget exhausted after {attempts} connect attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
}

impl StreamError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, StreamError::RetriesExhausted { .. })
    }
}

/// Errors raised by the external detection model adapter
#[derive(Error, Debug, Clone)]
pub enum DetectionError {
    #[error("Model invocation failed: {details}")]
    Invocation { details: String },

    #[error("Model request timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Malformed model response: {details}")]
    MalformedResponse { details: String },

    #[error("Frame encoding failed: {details}")]
    Encoding { details: String },
}

/// Errors raised by persistence and notification sinks
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("Database insert failed: {details}")]
    Insert { details: String },

    #[error("Database connection failed: {details}")]
    Connection { details: String },

    #[error("File write to {path} failed: {details}")]
    FileWrite { path: String, details: String },

    #[error("Image encoding failed: {details}")]
    Encoding { details: String },

    #[error("Publish to {topic} failed: {details}")]
    Publish { topic: String, details: String },

    #[error("Publish to {topic} timed out after {timeout:?}")]
    PublishTimeout { topic: String, timeout: Duration },
}

pub type Result<T> = std::result::Result<T, CatwatchError>;
