use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Axis aligned box. Pixel or normalized coordinates depending on context.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: f32,
    pub y_min: f32,
    pub x_max: f32,
    pub y_max: f32,
}

impl BoundingBox {
    pub fn new(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
        Self {
            x_min: x_min.min(x_max),
            y_min: y_min.min(y_max),
            x_max: x_min.max(x_max),
            y_max: y_min.max(y_max),
        }
    }

    pub fn from_array(values: [f32; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x_min + self.x_max) / 2.0, (self.y_min + self.y_max) / 2.0)
    }

    pub fn width(&self) -> f32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f32 {
        self.y_max - self.y_min
    }

    /// Inclusive point containment
    pub fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.x_min && x <= self.x_max && y >= self.y_min && y <= self.y_max
    }

    /// Overlap with positive area
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x_min < other.x_max
            && self.x_max > other.x_min
            && self.y_min < other.y_max
            && self.y_max > other.y_min
    }

    /// Convert pixel coordinates into [0, 1] relative to the frame size
    pub fn normalized(&self, width: u32, height: u32) -> BoundingBox {
        let w = width.max(1) as f32;
        let h = height.max(1) as f32;
        BoundingBox::new(
            (self.x_min / w).clamp(0.0, 1.0),
            (self.y_min / h).clamp(0.0, 1.0),
            (self.x_max / w).clamp(0.0, 1.0),
            (self.y_max / h).clamp(0.0, 1.0),
        )
    }

    /// Scale normalized coordinates back to pixels
    pub fn to_pixels(&self, width: u32, height: u32) -> BoundingBox {
        BoundingBox::new(
            self.x_min * width as f32,
            self.y_min * height as f32,
            self.x_max * width as f32,
            self.y_max * height as f32,
        )
    }
}

/// Unfiltered model output in pixel coordinates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    #[serde(alias = "label")]
    pub class: String,
    #[serde(alias = "conf", alias = "score")]
    pub confidence: f32,
    pub bbox: [f32; 4],
}

/// An accepted detection.
///
/// The box is normalized to [0, 1], the same space as the ignore zone.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub id: Uuid,
    pub class: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
    pub frame_sequence: u64,
    pub timestamp: DateTime<Utc>,
}
