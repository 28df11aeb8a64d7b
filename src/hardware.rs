//! Model variant selection from the host's hardware profile.
//!
//! [`select_model`] is a pure function of a [`HardwareDescriptor`] so it can be
//! exercised without real hardware. [`HardwareDescriptor::probe`] is the only
//! part that touches the host.

use serde::{Deserialize, Serialize};
use std::fs;
use tracing::{debug, warn};

const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";
const MEMINFO: &str = "/proc/meminfo";
const FALLBACK_MEMORY_GB: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Jetson,
    RaspberryPi,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareDescriptor {
    pub device_class: DeviceClass,
    pub memory_gb: f64,
    pub cpu_cores: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelSize {
    Medium,
    Large,
    ExtraLarge,
}

impl ModelSize {
    fn suffix(&self) -> &'static str {
        match self {
            ModelSize::Medium => "m",
            ModelSize::Large => "l",
            ModelSize::ExtraLarge => "x",
        }
    }
}

/// Model variant to request from the inference endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSelection {
    pub model: String,
    pub size: Option<ModelSize>,
    pub device_class: DeviceClass,
    /// GPU inference is available on the device
    pub accelerated: bool,
    /// Selected from configuration rather than from the hardware profile
    pub overridden: bool,
}

impl HardwareDescriptor {
    /// Inspect the running host
    pub fn probe() -> Self {
        let model = fs::read_to_string(DEVICE_TREE_MODEL).ok();
        let device_class = model
            .as_deref()
            .map(classify_device_model)
            .unwrap_or(DeviceClass::Generic);

        let memory_gb = match fs::read_to_string(MEMINFO) {
            Ok(contents) => parse_meminfo_total_gb(&contents).unwrap_or_else(|| {
                warn!("MemTotal missing from {}, assuming {} GB", MEMINFO, FALLBACK_MEMORY_GB);
                FALLBACK_MEMORY_GB
            }),
            Err(e) => {
                warn!("Cannot read {}: {}, assuming {} GB", MEMINFO, e, FALLBACK_MEMORY_GB);
                FALLBACK_MEMORY_GB
            }
        };

        let cpu_cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        let descriptor = Self {
            device_class,
            memory_gb,
            cpu_cores,
        };
        debug!("Probed hardware: {:?}", descriptor);
        descriptor
    }

    pub fn with_device_class(mut self, device_class: DeviceClass) -> Self {
        self.device_class = device_class;
        self
    }
}

/// Map a device-tree model string to a device class
pub fn classify_device_model(model: &str) -> DeviceClass {
    let model = model.trim_end_matches('\0').to_ascii_lowercase();
    if model.contains("jetson") || model.contains("nvidia") {
        DeviceClass::Jetson
    } else if model.contains("raspberry pi") {
        DeviceClass::RaspberryPi
    } else {
        DeviceClass::Generic
    }
}

/// Parse `MemTotal` (kB) from /proc/meminfo contents into gigabytes
pub fn parse_meminfo_total_gb(contents: &str) -> Option<f64> {
    contents
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb as f64 / (1024.0 * 1024.0))
}

/// Pick a model variant for the given hardware.
///
/// An explicit `model_override` always wins.
pub fn select_model(descriptor: &HardwareDescriptor, model_override: Option<&str>) -> ModelSelection {
    let accelerated = descriptor.device_class == DeviceClass::Jetson;

    if let Some(model) = model_override {
        return ModelSelection {
            model: model.to_string(),
            size: None,
            device_class: descriptor.device_class,
            accelerated,
            overridden: true,
        };
    }

    let memory = descriptor.memory_gb;
    let size = match descriptor.device_class {
        DeviceClass::Jetson | DeviceClass::RaspberryPi => {
            if memory >= 8.0 {
                ModelSize::ExtraLarge
            } else if memory >= 4.0 {
                ModelSize::Large
            } else {
                ModelSize::Medium
            }
        }
        DeviceClass::Generic => {
            if memory >= 16.0 {
                ModelSize::ExtraLarge
            } else if memory >= 8.0 {
                ModelSize::Large
            } else {
                ModelSize::Medium
            }
        }
    };

    ModelSelection {
        model: format!("yolo11{}", size.suffix()),
        size: Some(size),
        device_class: descriptor.device_class,
        accelerated,
        overridden: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(device_class: DeviceClass, memory_gb: f64) -> HardwareDescriptor {
        HardwareDescriptor {
            device_class,
            memory_gb,
            cpu_cores: 4,
        }
    }

    #[test]
    fn test_embedded_thresholds() {
        for class in [DeviceClass::Jetson, DeviceClass::RaspberryPi] {
            assert_eq!(select_model(&descriptor(class, 8.0), None).model, "yolo11x");
            assert_eq!(select_model(&descriptor(class, 7.6), None).model, "yolo11l");
            assert_eq!(select_model(&descriptor(class, 4.0), None).model, "yolo11l");
            assert_eq!(select_model(&descriptor(class, 2.0), None).model, "yolo11m");
        }
    }

    #[test]
    fn test_generic_thresholds() {
        let class = DeviceClass::Generic;
        assert_eq!(select_model(&descriptor(class, 32.0), None).model, "yolo11x");
        assert_eq!(select_model(&descriptor(class, 8.0), None).model, "yolo11l");
        assert_eq!(select_model(&descriptor(class, 6.0), None).model, "yolo11m");
    }

    #[test]
    fn test_override_wins() {
        let selection = select_model(&descriptor(DeviceClass::Jetson, 2.0), Some("yolo11n"));
        assert_eq!(selection.model, "yolo11n");
        assert!(selection.overridden);
        assert!(selection.accelerated);
        assert_eq!(selection.size, None);
    }

    #[test]
    fn test_only_jetson_is_accelerated() {
        assert!(select_model(&descriptor(DeviceClass::Jetson, 4.0), None).accelerated);
        assert!(!select_model(&descriptor(DeviceClass::RaspberryPi, 4.0), None).accelerated);
        assert!(!select_model(&descriptor(DeviceClass::Generic, 4.0), None).accelerated);
    }

    #[test]
    fn test_classify_device_model() {
        assert_eq!(
            classify_device_model("NVIDIA Jetson Orin Nano Developer Kit\0"),
            DeviceClass::Jetson
        );
        assert_eq!(
            classify_device_model("Raspberry Pi 5 Model B Rev 1.0\0"),
            DeviceClass::RaspberryPi
        );
        assert_eq!(classify_device_model("QEMU Virtual Machine"), DeviceClass::Generic);
    }

    #[test]
    fn test_parse_meminfo() {
        let contents = "MemTotal:        8056832 kB\nMemFree:         1234 kB\n";
        let gb = parse_meminfo_total_gb(contents).unwrap();
        assert!((gb - 7.68).abs() < 0.01);
        assert!(parse_meminfo_total_gb("MemFree: 1 kB").is_none());
    }
}
