use super::types::Detection;
use crate::config::DetectionConfig;
use crate::frame::Frame;
use image::RgbImage;
use std::sync::Arc;
#[cfg(feature = "annotation")]
use tracing::warn;

/// Draws accepted boxes onto a copy of the frame
pub struct Annotator {
    enabled: bool,
    #[cfg(feature = "annotation")]
    font: Option<rusttype::Font<'static>>,
    #[cfg(feature = "annotation")]
    font_size: f32,
}

impl Annotator {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            #[cfg(feature = "annotation")]
            font: None,
            #[cfg(feature = "annotation")]
            font_size: 0.0,
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        if !config.annotate {
            return Self::disabled();
        }

        #[cfg(feature = "annotation")]
        {
            let font = config.font_path.as_deref().and_then(|path| {
                match std::fs::read(path) {
                    Ok(data) => {
                        let font = rusttype::Font::try_from_vec(data);
                        if font.is_none() {
                            warn!("Failed to parse font file '{}', labels disabled", path);
                        }
                        font
                    }
                    Err(e) => {
                        warn!("Failed to read font file '{}': {}, labels disabled", path, e);
                        None
                    }
                }
            });

            Self {
                enabled: true,
                font,
                font_size: config.font_size,
            }
        }

        #[cfg(not(feature = "annotation"))]
        {
            Self { enabled: false }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Image to store for a frame with detections
    pub fn render(&self, frame: &Frame, detections: &[Detection]) -> Arc<RgbImage> {
        if !self.enabled || detections.is_empty() {
            return Arc::clone(&frame.image);
        }

        #[cfg(feature = "annotation")]
        {
            Arc::new(self.draw(&frame.image, detections))
        }

        #[cfg(not(feature = "annotation"))]
        {
            Arc::clone(&frame.image)
        }
    }

    #[cfg(feature = "annotation")]
    fn draw(&self, image: &RgbImage, detections: &[Detection]) -> RgbImage {
        use image::Rgb;
        use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
        use imageproc::rect::Rect;
        use rusttype::Scale;

        const BOX_COLOR: Rgb<u8> = Rgb([0, 220, 0]);
        const THICKNESS: u32 = 3;

        let mut canvas = image.clone();
        let (width, height) = canvas.dimensions();

        for detection in detections {
            let pixels = detection.bbox.to_pixels(width, height);
            let x = pixels.x_min.round() as i32;
            let y = pixels.y_min.round() as i32;
            let w = (pixels.width().round() as u32).max(1);
            let h = (pixels.height().round() as u32).max(1);

            for inset in 0..THICKNESS {
                if w <= inset * 2 || h <= inset * 2 {
                    break;
                }
                let rect = Rect::at(x + inset as i32, y + inset as i32)
                    .of_size(w - inset * 2, h - inset * 2);
                draw_hollow_rect_mut(&mut canvas, rect, BOX_COLOR);
            }

            if let Some(font) = &self.font {
                let label = format!("{} {:.2}", detection.class, detection.confidence);
                let scale = Scale::uniform(self.font_size);
                let (text_w, text_h) = text_size(scale, font, &label);
                let label_y = (y - text_h - 4).max(0);
                draw_filled_rect_mut(
                    &mut canvas,
                    Rect::at(x, label_y).of_size(text_w.max(1) as u32 + 4, text_h.max(1) as u32 + 4),
                    BOX_COLOR,
                );
                draw_text_mut(&mut canvas, Rgb([0, 0, 0]), x + 2, label_y + 2, scale, font, &label);
            }
        }

        canvas
    }
}
