mod annotate;
mod filter;
mod http;
mod stage;
mod types;

pub use annotate::Annotator;
pub use filter::{DetectionFilter, RejectReason};
pub use http::HttpDetector;
pub use stage::{DetectionOutcome, DetectionStage, ObjectDetector};
pub use types::{BoundingBox, Detection, RawDetection};
