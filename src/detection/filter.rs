use super::types::BoundingBox;
use crate::config::{DetectionConfig, IgnoreZoneMode};
use std::collections::HashSet;

/// Why a candidate was discarded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// NaN or outside 0..=1
    InvalidConfidence,
    BelowThreshold,
    UnwantedClass,
    InIgnoreZone,
}

/// Confidence, class and ignore-zone rules applied to every candidate
#[derive(Debug, Clone)]
pub struct DetectionFilter {
    threshold: f32,
    ignore_zone: Option<BoundingBox>,
    zone_mode: IgnoreZoneMode,
    classes: HashSet<String>,
}

impl DetectionFilter {
    pub fn new(threshold: f32, ignore_zone: Option<[f32; 4]>, zone_mode: IgnoreZoneMode) -> Self {
        Self {
            threshold,
            ignore_zone: ignore_zone.map(BoundingBox::from_array),
            zone_mode,
            classes: HashSet::new(),
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(
            config.confidence_threshold,
            config.ignore_zone,
            config.ignore_zone_mode,
        )
        .with_classes(config.target_classes.iter().map(String::as_str))
    }

    /// Restrict accepted classes; an empty set accepts everything
    pub fn with_classes<'a>(mut self, classes: impl IntoIterator<Item = &'a str>) -> Self {
        self.classes = classes
            .into_iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Check a candidate whose box is in normalized coordinates
    pub fn check(&self, class: &str, confidence: f32, bbox: &BoundingBox) -> Result<(), RejectReason> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(RejectReason::InvalidConfidence);
        }
        if confidence < self.threshold {
            return Err(RejectReason::BelowThreshold);
        }

        if !self.classes.is_empty() && !self.classes.contains(&class.to_ascii_lowercase()) {
            return Err(RejectReason::UnwantedClass);
        }

        if let Some(zone) = &self.ignore_zone {
            let inside = match self.zone_mode {
                IgnoreZoneMode::Center => {
                    let (cx, cy) = bbox.center();
                    zone.contains(cx, cy)
                }
                IgnoreZoneMode::Overlap => zone.intersects(bbox),
            };
            if inside {
                return Err(RejectReason::InIgnoreZone);
            }
        }

        Ok(())
    }
}
