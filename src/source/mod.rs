mod connector;
mod frame_source;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod rtsp;
mod state;

pub use connector::{test_pattern, StreamConnection, StreamConnector, SyntheticConnector};
pub use frame_source::{FrameSource, SourceEvent, SourceSettings};
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use rtsp::RtspConnector;
pub use state::{ConnectionState, StateTransition};

use crate::config::StreamConfig;
use std::sync::Arc;

/// Scheme that selects the synthetic test pattern instead of a camera
pub const SYNTHETIC_SCHEME: &str = "test://";

/// Pick a connector for the configured stream url
pub fn connector_from_config(
    config: &StreamConfig,
) -> crate::error::Result<Arc<dyn StreamConnector>> {
    if config.url.starts_with(SYNTHETIC_SCHEME) {
        let (width, height) = config.max_resolution;
        return Ok(Arc::new(SyntheticConnector::new(width.min(1280), height.min(720), 10)));
    }

    #[cfg(all(feature = "camera", target_os = "linux"))]
    {
        Ok(Arc::new(RtspConnector::new(config)?))
    }

    #[cfg(not(all(feature = "camera", target_os = "linux")))]
    {
        Err(crate::error::CatwatchError::component(
            "frame_source",
            format!(
                "RTSP ingestion of {} requires the camera feature on Linux",
                config.url
            ),
        ))
    }
}
