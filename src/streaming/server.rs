use crate::{
    config::MonitoringConfig,
    error::{CatwatchError, Result},
    telemetry::StatusFeed,
};
use axum::{routing::get, Router};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use super::handlers::{
    all_handler, detections_handler, frame_handler, health_handler, index_handler,
    metrics_handler, mjpeg_stream_handler, queues_handler, status_handler, timing_handler,
    timing_history_handler, websocket_handler,
};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) feed: Arc<StatusFeed>,
    pub(crate) camera_name: String,
    pub(crate) mjpeg_interval: Duration,
}

/// HTTP view of the running pipeline: JSON status, the current frame,
/// an MJPEG stream and a WebSocket push channel
pub struct StatusServer {
    pub(crate) config: MonitoringConfig,
    pub(crate) state: ServerState,
}

impl StatusServer {
    pub fn new(config: MonitoringConfig, feed: Arc<StatusFeed>, camera_name: impl Into<String>) -> Self {
        let mjpeg_interval = Duration::from_millis(config.update_interval_ms.clamp(50, 1000));
        Self {
            config,
            state: ServerState {
                feed,
                camera_name: camera_name.into(),
                mjpeg_interval,
            },
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.ip, self.config.port)
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(index_handler))
            .route("/health", get(health_handler))
            .route("/api/status", get(status_handler))
            .route("/api/metrics", get(metrics_handler))
            .route("/api/detections", get(detections_handler))
            .route("/api/queues", get(queues_handler))
            .route("/api/timing", get(timing_handler))
            .route("/api/timing/history", get(timing_history_handler))
            .route("/api/all", get(all_handler))
            .route("/api/frame", get(frame_handler))
            .route("/stream.mjpg", get(mjpeg_stream_handler))
            .route("/ws/monitoring", get(websocket_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub async fn bind(&self) -> Result<TcpListener> {
        let addr = self.address();
        TcpListener::bind(&addr).await.map_err(|e| {
            CatwatchError::component("status_server", format!("Failed to bind {}: {}", addr, e))
        })
    }

    /// Serve on an already bound listener until cancelled
    pub async fn serve(&self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.address());
        info!("Status server listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(|e| CatwatchError::component("status_server", format!("Server error: {}", e)))?;

        info!("Status server stopped");
        Ok(())
    }

    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, cancel).await
    }
}
