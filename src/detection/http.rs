use super::stage::ObjectDetector;
use super::types::RawDetection;
use crate::error::DetectionError;
use crate::frame::Frame;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;
use tracing::trace;

const UPLOAD_JPEG_QUALITY: u8 = 90;

/// Inference endpoint response, either a bare list or wrapped
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DetectResponse {
    Wrapped { detections: Vec<RawDetection> },
    Bare(Vec<RawDetection>),
}

/// Sends frames as JPEG to an HTTP inference service
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl HttpDetector {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DetectionError::Invocation {
                details: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            model: model.into(),
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ObjectDetector for HttpDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
        let encode_frame = frame.clone();
        let jpeg = tokio::task::spawn_blocking(move || encode_frame.to_jpeg(UPLOAD_JPEG_QUALITY))
            .await
            .map_err(|e| DetectionError::Encoding {
                details: e.to_string(),
            })?
            .map_err(|e| DetectionError::Encoding {
                details: e.to_string(),
            })?;

        let image = Part::bytes(jpeg)
            .file_name(format!("frame_{}.jpg", frame.sequence))
            .mime_str("image/jpeg")
            .map_err(|e| DetectionError::Invocation {
                details: e.to_string(),
            })?;

        let form = Form::new()
            .part("image", image)
            .text("model", self.model.clone())
            .text("width", frame.width().to_string())
            .text("height", frame.height().to_string());

        let resp = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DetectionError::Timeout {
                        timeout: self.timeout,
                    }
                } else {
                    DetectionError::Invocation {
                        details: e.to_string(),
                    }
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(DetectionError::Invocation {
                details: format!("inference endpoint returned {}: {}", status, body),
            });
        }

        let body = resp.bytes().await.map_err(|e| DetectionError::Invocation {
            details: e.to_string(),
        })?;
        let detections = parse_response(&body)?;
        trace!(
            "Model {} returned {} candidates for frame {}",
            self.model,
            detections.len(),
            frame.sequence
        );
        Ok(detections)
    }

    fn name(&self) -> String {
        format!("{} via {}", self.model, self.endpoint)
    }
}

pub(crate) fn parse_response(body: &[u8]) -> Result<Vec<RawDetection>, DetectionError> {
    let response: DetectResponse =
        serde_json::from_slice(body).map_err(|e| DetectionError::MalformedResponse {
            details: e.to_string(),
        })?;

    Ok(match response {
        DetectResponse::Wrapped { detections } => detections,
        DetectResponse::Bare(detections) => detections,
    })
}
