use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use super::server::ServerState;
use crate::telemetry::StatusFeed;

const DEFAULT_DETECTIONS_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Connection and frame-rate summary
pub async fn status_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let snapshot = state.feed.snapshot();
    Json(serde_json::json!({
        "camera": state.camera_name,
        "is_streaming": snapshot.is_streaming,
        "connection_state": snapshot.connection_state,
        "uptime_secs": snapshot.uptime_secs,
        "last_frame_time": snapshot.last_frame_time,
        "last_frame_sequence": snapshot.last_frame_sequence,
        "fps": snapshot.metrics.fps,
        "current_fps": snapshot.metrics.current_fps,
        "subscribers": state.feed.subscriber_count(),
    }))
}

pub async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let snapshot = state.feed.snapshot();
    Json(serde_json::json!({
        "metrics": snapshot.metrics,
        "notifications": snapshot.notifications,
        "eviction": snapshot.eviction,
    }))
}

/// Most recent detections, newest first, ten unless `limit` says otherwise
pub async fn detections_handler(
    State(state): State<ServerState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let snapshot = state.feed.snapshot();
    let limit = query.limit.unwrap_or(DEFAULT_DETECTIONS_LIMIT);
    let detections: Vec<_> = snapshot
        .recent_detections
        .into_iter()
        .rev()
        .take(limit)
        .collect();
    Json(serde_json::json!({
        "count": detections.len(),
        "detections": detections,
    }))
}

pub async fn queues_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.feed.snapshot().queues)
}

pub async fn timing_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.feed.snapshot().timing)
}

/// Per-frame stage timings, newest first
pub async fn timing_history_handler(
    State(state): State<ServerState>,
    Query(query): Query<LimitQuery>,
) -> impl IntoResponse {
    let frames = state.feed.telemetry().timing_history(query.limit);
    Json(serde_json::json!({
        "count": frames.len(),
        "frames": frames,
    }))
}

pub async fn all_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.feed.snapshot())
}

/// Latest frame as a single JPEG
pub async fn frame_handler(State(state): State<ServerState>) -> Response {
    let feed = Arc::clone(&state.feed);
    let encoded = tokio::task::spawn_blocking(move || feed.current_frame_jpeg()).await;

    match encoded {
        Ok(Ok(Some(jpeg))) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "image/jpeg")
            .header(header::CACHE_CONTROL, "no-cache, private")
            .body(axum::body::Body::from(jpeg))
            .unwrap_or_else(|e| internal_error(e.to_string())),
        Ok(Ok(None)) => (StatusCode::NOT_FOUND, "No frame available").into_response(),
        Ok(Err(e)) => internal_error(e.to_string()),
        Err(e) => internal_error(e.to_string()),
    }
}

fn internal_error(details: String) -> Response {
    error!("Failed to serve frame: {}", details);
    (StatusCode::INTERNAL_SERVER_ERROR, details).into_response()
}

async fn encode_current(feed: &Arc<StatusFeed>) -> Option<(u64, Vec<u8>)> {
    let feed = Arc::clone(feed);
    tokio::task::spawn_blocking(move || {
        let frame = feed.current_frame()?;
        match feed.encode_frame(&frame) {
            Ok(jpeg) => Some((frame.sequence, jpeg)),
            Err(e) => {
                warn!("Frame encoding for stream failed: {}", e);
                None
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Handler for MJPEG streaming endpoint
pub async fn mjpeg_stream_handler(State(state): State<ServerState>) -> Response {
    info!("New MJPEG stream client connected");

    let stream = async_stream::stream! {
        let mut last_sequence = None;
        let mut ticker = interval(state.mjpeg_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut frames_streamed = 0u64;

        loop {
            ticker.tick().await;

            let sequence = state.feed.current_frame().map(|f| f.sequence);
            if sequence.is_none() {
                trace!("No frames available for streaming");
                continue;
            }
            if sequence == last_sequence {
                continue;
            }

            let Some((sequence, jpeg)) = encode_current(&state.feed).await else {
                continue;
            };
            last_sequence = Some(sequence);
            frames_streamed += 1;

            let boundary = format!(
                "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Frame-ID: {}\r\n\r\n",
                jpeg.len(),
                sequence
            );

            yield Ok::<_, axum::Error>(Bytes::from(boundary));
            yield Ok(Bytes::from(jpeg));
            yield Ok(Bytes::from("\r\n"));

            if frames_streamed % 100 == 0 {
                debug!("MJPEG client received {} frames", frames_streamed);
            }
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=FRAME",
        )
        .header(header::CACHE_CONTROL, "no-cache, private")
        .header(header::PRAGMA, "no-cache")
        .body(axum::body::Body::from_stream(stream))
        .unwrap_or_else(|e| internal_error(e.to_string()))
}

/// WebSocket upgrade for the live status push
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

async fn handle_websocket(socket: WebSocket, state: ServerState) {
    let (mut sender, mut receiver) = socket.split();
    let mut updates = state.feed.subscribe();
    info!(
        "Monitoring client connected ({} subscribers)",
        state.feed.subscriber_count()
    );

    let initial = serde_json::json!({
        "type": "initial",
        "timestamp": chrono::Utc::now(),
        "data": state.feed.snapshot(),
    });
    if sender
        .send(Message::Text(initial.to_string()))
        .await
        .is_err()
    {
        return;
    }

    let mut send_task = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    let text = match serde_json::to_string(update.as_ref()) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize status update: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Monitoring client lagging, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Ok(Message::Ping(data)) => trace!("Received ping: {:?}", data),
                Ok(_) => {}
                Err(e) => {
                    warn!("Monitoring socket error: {}", e);
                    break;
                }
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    info!("Monitoring client disconnected");
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let snapshot = state.feed.snapshot();

    let health_info = serde_json::json!({
        "status": "healthy",
        "camera": state.camera_name,
        "connection_state": snapshot.connection_state,
        "frames_available": snapshot.last_frame_sequence.is_some(),
        "latest_frame_sequence": snapshot.last_frame_sequence,
        "uptime_secs": snapshot.uptime_secs,
        "subscribers": state.feed.subscriber_count(),
    });

    (StatusCode::OK, Json(health_info))
}

/// Viewer page with the live stream and a status line fed by the WebSocket
pub async fn index_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <title>Catwatch {camera}</title>
    <style>
        :root {{ color-scheme: dark; }}
        body {{
            margin: 0;
            background: #000;
            color: #ddd;
            font-family: monospace;
            display: flex;
            flex-direction: column;
            align-items: center;
            justify-content: center;
            min-height: 100vh;
        }}
        img.stream {{
            display: block;
            max-width: 100vw;
            max-height: 90vh;
            object-fit: contain;
        }}
        #status {{ padding: 0.5em; }}
    </style>
</head>
<body>
    <img class="stream" src="/stream.mjpg" alt="{camera} stream">
    <div id="status">connecting...</div>
    <script>
        const status = document.getElementById("status");
        const proto = location.protocol === "https:" ? "wss" : "ws";
        const ws = new WebSocket(`${{proto}}://${{location.host}}/ws/monitoring`);
        ws.onmessage = (event) => {{
            const s = JSON.parse(event.data).data;
            status.textContent =
                `${{s.connection_state}} | ${{s.metrics.current_fps.toFixed(1)}} fps | ` +
                `${{s.metrics.frames_captured}} frames | ${{s.metrics.detections_total}} detections`;
        }};
        ws.onclose = () => {{ status.textContent = "disconnected"; }};
    </script>
</body>
</html>
"#,
        camera = escape_html(&state.camera_name),
    );

    Html(html)
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
