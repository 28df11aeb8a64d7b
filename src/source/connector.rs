use crate::error::StreamError;
use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::time::Duration;
use tokio::time::Instant;

/// Opens connections to a video stream
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError>;

    /// Human readable target for logs
    fn describe(&self) -> String;
}

/// One open stream connection
#[async_trait]
pub trait StreamConnection: Send {
    /// Next decoded frame, `Ok(None)` when a finite stream has ended
    async fn read_frame(&mut self) -> Result<Option<RgbImage>, StreamError>;

    async fn close(&mut self);
}

/// Generates a moving test pattern at a fixed rate.
///
/// Selected with a `test://` stream url so the whole pipeline can run
/// without a camera.
#[derive(Debug, Clone)]
pub struct SyntheticConnector {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Frames per connection before end of stream, unbounded when `None`
    pub frame_limit: Option<u64>,
}

impl SyntheticConnector {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width,
            height,
            fps,
            frame_limit: None,
        }
    }

    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }
}

impl Default for SyntheticConnector {
    fn default() -> Self {
        Self::new(640, 480, 10)
    }
}

#[async_trait]
impl StreamConnector for SyntheticConnector {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        Ok(Box::new(SyntheticConnection {
            config: self.clone(),
            produced: 0,
            next_due: Instant::now(),
        }))
    }

    fn describe(&self) -> String {
        format!("synthetic {}x{} @ {}fps", self.width, self.height, self.fps)
    }
}

struct SyntheticConnection {
    config: SyntheticConnector,
    produced: u64,
    next_due: Instant,
}

#[async_trait]
impl StreamConnection for SyntheticConnection {
    async fn read_frame(&mut self) -> Result<Option<RgbImage>, StreamError> {
        if let Some(limit) = self.config.frame_limit {
            if self.produced >= limit {
                return Ok(None);
            }
        }

        tokio::time::sleep_until(self.next_due).await;
        let period = Duration::from_micros(1_000_000 / self.config.fps.max(1) as u64);
        self.next_due = Instant::now() + period;

        let image = test_pattern(self.config.width, self.config.height, self.produced);
        self.produced += 1;
        Ok(Some(image))
    }

    async fn close(&mut self) {}
}

/// Gradient background with a square sweeping left to right
pub fn test_pattern(width: u32, height: u32, index: u64) -> RgbImage {
    let size = (width.min(height) / 6).max(1);
    let x0 = ((index * 8) % width.max(1) as u64) as u32;
    let y0 = height.saturating_sub(size) / 2;

    RgbImage::from_fn(width, height, |x, y| {
        if x >= x0 && x < x0 + size && y >= y0 && y < y0 + size {
            Rgb([230, 120, 40])
        } else {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            Rgb([r / 2, g / 2, 64])
        }
    })
}
