use crate::error::Result;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{ColorType, RgbImage};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// One decoded frame sampled from the stream.
///
/// The pixel buffer sits behind an `Arc` so that detection, the status feed
/// and the persistence queues can share it without copying. Nothing mutates
/// the buffer after construction.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Monotonic sequence number within one source run
    pub sequence: u64,
    /// Monotonic capture instant
    pub captured_at: Instant,
    /// Wall clock capture time
    pub timestamp: SystemTime,
    /// Decoded RGB pixels
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(sequence: u64, image: RgbImage) -> Self {
        Self {
            sequence,
            captured_at: Instant::now(),
            timestamp: SystemTime::now(),
            image: Arc::new(image),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Time elapsed since capture
    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }

    pub fn timestamp_millis(&self) -> u64 {
        self.timestamp
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }

    /// Downscale so the frame fits inside `max_width` x `max_height`.
    ///
    /// Returns the original frame untouched (same allocation) when it already fits.
    pub fn fit_within(&self, max_width: u32, max_height: u32) -> Frame {
        let (width, height) = (self.width(), self.height());
        if width <= max_width && height <= max_height {
            return self.clone();
        }

        let (new_width, new_height) = scaled_dimensions(width, height, max_width, max_height);
        let resized = imageops::resize(self.image.as_ref(), new_width, new_height, FilterType::Triangle);

        Frame {
            sequence: self.sequence,
            captured_at: self.captured_at,
            timestamp: self.timestamp,
            image: Arc::new(resized),
        }
    }

    pub fn to_jpeg(&self, quality: u8) -> Result<Vec<u8>> {
        encode_jpeg(&self.image, quality)
    }
}

/// Largest dimensions with the source aspect ratio that fit the bounds
pub fn scaled_dimensions(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    let scale = f64::min(
        max_width as f64 / width.max(1) as f64,
        max_height as f64 / height.max(1) as f64,
    );
    let new_width = ((width as f64 * scale).round() as u32).clamp(1, max_width);
    let new_height = ((height as f64 * scale).round() as u32).clamp(1, max_height);
    (new_width, new_height)
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut output = Vec::new();
    {
        let mut encoder = JpegEncoder::new_with_quality(&mut output, quality);
        encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
    }
    Ok(output)
}

/// Resize to a fixed width keeping the aspect ratio
pub fn thumbnail(image: &RgbImage, width: u32) -> RgbImage {
    let height = ((image.height() as f64 * width as f64) / image.width().max(1) as f64)
        .round()
        .max(1.0) as u32;
    imageops::resize(image, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_within_keeps_small_frames() {
        let frame = Frame::new(1, RgbImage::new(640, 480));
        let fitted = frame.fit_within(1920, 1080);
        assert!(Arc::ptr_eq(&frame.image, &fitted.image));
    }

    #[test]
    fn test_fit_within_preserves_aspect() {
        let frame = Frame::new(7, RgbImage::new(3840, 2160));
        let fitted = frame.fit_within(1920, 1080);
        assert_eq!((fitted.width(), fitted.height()), (1920, 1080));
        assert_eq!(fitted.sequence, 7);
        assert_eq!(fitted.timestamp, frame.timestamp);

        let tall = Frame::new(8, RgbImage::new(1000, 4000));
        let fitted = tall.fit_within(1920, 1080);
        assert_eq!((fitted.width(), fitted.height()), (270, 1080));
    }

    #[test]
    fn test_thumbnail_width() {
        let thumb = thumbnail(&RgbImage::new(1920, 1080), 300);
        assert_eq!(thumb.width(), 300);
        assert_eq!(thumb.height(), 169);
    }

    #[test]
    fn test_encode_jpeg_markers() {
        let jpeg = encode_jpeg(&RgbImage::new(32, 16), 80).unwrap();
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert_eq!(&jpeg[jpeg.len() - 2..], &[0xFF, 0xD9]);
    }
}
