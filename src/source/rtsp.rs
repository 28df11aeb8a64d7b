use super::connector::{StreamConnection, StreamConnector};
use crate::config::{ConnectionMode, RtspTransport, StreamConfig};
use crate::error::StreamError;
use async_trait::async_trait;
use gstreamer::prelude::*;
use gstreamer::{ClockTime, MessageView, Pipeline};
use gstreamer_app::AppSink;
use gstreamer_video::VideoInfo;
use image::RgbImage;
use std::ops::Deref;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// RTSP ingestion through a GStreamer `rtspsrc ! decodebin ! appsink` pipeline
pub struct RtspConnector {
    url: String,
    transport: RtspTransport,
    low_delay: bool,
    mode: ConnectionMode,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl RtspConnector {
    pub fn new(config: &StreamConfig) -> Result<Self, StreamError> {
        gstreamer::init().map_err(|e| StreamError::Pipeline {
            details: format!("Failed to initialize GStreamer: {}", e),
        })?;

        Ok(Self {
            url: config.url.clone(),
            transport: config.transport,
            low_delay: config.low_delay,
            mode: config.connection_mode,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
        })
    }

    /// Build GStreamer pipeline string for RTSP decode into RGB
    fn build_pipeline_string(&self) -> String {
        let latency = if self.low_delay { 0 } else { 200 };
        // Only the freshest decoded frame is kept in continuous mode
        let sink_buffers = match self.mode {
            ConnectionMode::Continuous => "max-buffers=1 drop=true",
            ConnectionMode::ReconnectPerFrame => "max-buffers=1 drop=false",
        };

        format!(
            "rtspsrc location={} protocols={} latency={} drop-on-latency=true ! \
             decodebin ! videoconvert ! video/x-raw,format=RGB ! \
             appsink name=sink sync=false {} emit-signals=false",
            quote_property(&self.url),
            self.transport.as_str(),
            latency,
            sink_buffers
        )
    }
}

/// Quote a value for a `gst-launch` style description
fn quote_property(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Stops the pipeline when dropped, including when a connect or read
/// result is thrown away after the caller gave up on it
struct PipelineGuard(Pipeline);

impl Deref for PipelineGuard {
    type Target = Pipeline;

    fn deref(&self) -> &Pipeline {
        &self.0
    }
}

impl Drop for PipelineGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.set_state(gstreamer::State::Null) {
            debug!("Failed to stop GStreamer pipeline on drop: {}", e);
        }
    }
}

#[async_trait]
impl StreamConnector for RtspConnector {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        let pipeline_desc = self.build_pipeline_string();
        debug!("Creating GStreamer pipeline: {}", pipeline_desc);

        let url = self.url.clone();
        let connect_timeout = self.connect_timeout;

        let (pipeline, appsink, first) = tokio::task::spawn_blocking(move || {
            let pipeline = gstreamer::parse::launch(&pipeline_desc)
                .map_err(|e| StreamError::Pipeline {
                    details: format!("Failed to create pipeline: {}", e),
                })?
                .downcast::<Pipeline>()
                .map(PipelineGuard)
                .map_err(|_| StreamError::Pipeline {
                    details: "Failed to downcast to Pipeline".to_string(),
                })?;

            let appsink = pipeline
                .by_name("sink")
                .and_then(|element| element.downcast::<AppSink>().ok())
                .ok_or_else(|| StreamError::Pipeline {
                    details: "Pipeline has no appsink named 'sink'".to_string(),
                })?;

            pipeline
                .set_state(gstreamer::State::Playing)
                .map_err(|e| StreamError::ConnectFailed {
                    url: url.clone(),
                    details: format!("Failed to start pipeline: {}", e),
                })?;

            let timeout = ClockTime::from_mseconds(connect_timeout.as_millis() as u64);
            match appsink.try_pull_sample(timeout) {
                Some(sample) => {
                    let first = sample_to_image(&sample);
                    Ok((pipeline, appsink, first?))
                }
                None => {
                    let details = pipeline_error(&pipeline)
                        .unwrap_or_else(|| "no frame before connect timeout".to_string());
                    Err(StreamError::ConnectFailed { url, details })
                }
            }
        })
        .await
        .map_err(|e| StreamError::Pipeline {
            details: format!("Connect task failed: {}", e),
        })??;

        info!(
            "Connected to {} ({}x{})",
            self.url,
            first.width(),
            first.height()
        );

        Ok(Box::new(RtspConnection {
            pipeline,
            appsink,
            pending: Some(first),
            read_timeout: self.read_timeout,
        }))
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.url, self.transport.as_str())
    }
}

struct RtspConnection {
    pipeline: PipelineGuard,
    appsink: AppSink,
    pending: Option<RgbImage>,
    read_timeout: Duration,
}

#[async_trait]
impl StreamConnection for RtspConnection {
    async fn read_frame(&mut self) -> Result<Option<RgbImage>, StreamError> {
        if let Some(image) = self.pending.take() {
            return Ok(Some(image));
        }

        let appsink = self.appsink.clone();
        let pipeline = Pipeline::clone(&self.pipeline);
        let read_timeout = self.read_timeout;

        tokio::task::spawn_blocking(move || {
            let timeout = ClockTime::from_mseconds(read_timeout.as_millis() as u64);
            match appsink.try_pull_sample(timeout) {
                Some(sample) => sample_to_image(&sample).map(Some),
                // A live camera never ends; EOS means the session dropped
                None if appsink.is_eos() => Err(StreamError::ReadFailed {
                    details: "stream ended unexpectedly".to_string(),
                }),
                None => match pipeline_error(&pipeline) {
                    Some(details) => Err(StreamError::ReadFailed { details }),
                    None => Err(StreamError::ReadTimeout {
                        timeout: read_timeout,
                    }),
                },
            }
        })
        .await
        .map_err(|e| StreamError::ReadFailed {
            details: format!("Read task failed: {}", e),
        })?
    }

    async fn close(&mut self) {
        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!("Failed to stop GStreamer pipeline: {}", e);
        }
    }
}

/// Drain a pending error message from the pipeline bus
fn pipeline_error(pipeline: &Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    let message = bus.timed_pop_filtered(ClockTime::ZERO, &[gstreamer::MessageType::Error])?;
    match message.view() {
        MessageView::Error(err) => Some(format!(
            "{} ({})",
            err.error(),
            err.debug().map(|d| d.to_string()).unwrap_or_default()
        )),
        _ => None,
    }
}

/// Copy a packed RGB sample into an owned image, honouring row stride
fn sample_to_image(sample: &gstreamer::Sample) -> Result<RgbImage, StreamError> {
    let buffer = sample.buffer().ok_or_else(|| StreamError::ReadFailed {
        details: "No buffer in sample".to_string(),
    })?;

    let caps = sample.caps().ok_or_else(|| StreamError::ReadFailed {
        details: "No caps in sample".to_string(),
    })?;

    let video_info = VideoInfo::from_caps(caps).map_err(|e| StreamError::ReadFailed {
        details: format!("Failed to get video info: {}", e),
    })?;

    let width = video_info.width();
    let height = video_info.height();
    if width == 0 || height == 0 {
        return Err(StreamError::ReadFailed {
            details: "Sample has empty dimensions".to_string(),
        });
    }
    let stride = video_info.stride()[0] as usize;
    let row_bytes = width as usize * 3;

    let map = buffer.map_readable().map_err(|e| StreamError::ReadFailed {
        details: format!("Failed to map buffer: {}", e),
    })?;
    let data = map.as_slice();

    if stride < row_bytes || data.len() < stride * (height as usize - 1) + row_bytes {
        return Err(StreamError::ReadFailed {
            details: format!(
                "Buffer too small for {}x{} RGB (stride {}, {} bytes)",
                width,
                height,
                stride,
                data.len()
            ),
        });
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        pixels.extend_from_slice(&data[start..start + row_bytes]);
    }

    trace!("Decoded {}x{} RGB frame", width, height);

    RgbImage::from_raw(width, height, pixels).ok_or_else(|| StreamError::ReadFailed {
        details: "Decoded buffer does not match frame dimensions".to_string(),
    })
}
