use super::*;
use crate::config::CatwatchConfig;
use crate::detection::{ObjectDetector, RawDetection};
use crate::error::{DetectionError, StreamError};
use crate::frame::Frame;
use crate::hardware::{select_model, DeviceClass, HardwareDescriptor, ModelSelection};
use crate::source::{StreamConnection, StreamConnector, SyntheticConnector};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

struct CatDetector;

#[async_trait]
impl ObjectDetector for CatDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<RawDetection>, DetectionError> {
        Ok(vec![RawDetection {
            class: "cat".to_string(),
            confidence: 0.9,
            bbox: [10.0, 10.0, 40.0, 30.0],
        }])
    }

    fn name(&self) -> String {
        "cat".to_string()
    }
}

struct DeadConnector;

#[async_trait]
impl StreamConnector for DeadConnector {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        Err(StreamError::ConnectFailed {
            url: "rtsp://dead".to_string(),
            details: "connection refused".to_string(),
        })
    }

    fn describe(&self) -> String {
        "rtsp://dead".to_string()
    }
}

fn create_test_config(output: &std::path::Path) -> CatwatchConfig {
    let mut config = CatwatchConfig::default();
    config.stream.url = "test://pattern".to_string();
    config.stream.max_connect_retries = 2;
    config.stream.retry_base_delay_ms = 1;
    config.stream.retry_max_delay_ms = 5;
    config.stream.connect_timeout_ms = 200;
    config.stream.read_timeout_ms = 1000;
    config.detection.ignore_zone = None;
    config.detection.annotate = false;
    config.storage.camera_name = "cam_test".to_string();
    config.storage.output_dir = output.to_string_lossy().into_owned();
    config.storage.usage_threshold = 1.0;
    config.storage.drain_timeout_secs = 2;
    config.monitoring.ip = "127.0.0.1".to_string();
    config.monitoring.port = 0;
    config.monitoring.update_interval_ms = 50;
    config
}

fn test_model() -> ModelSelection {
    select_model(
        &HardwareDescriptor {
            device_class: DeviceClass::Generic,
            memory_gb: 8.0,
            cpu_cores: 4,
        },
        None,
    )
}

async fn orchestrator_with(
    config: CatwatchConfig,
    connector: Arc<dyn StreamConnector>,
) -> CatwatchOrchestrator {
    let mut orchestrator =
        CatwatchOrchestrator::assemble(config, test_model(), connector, Arc::new(CatDetector))
            .await
            .unwrap();
    orchestrator.initialize().await.unwrap();
    orchestrator
}

#[tokio::test]
async fn test_orchestrator_creation() {
    let output = tempfile::tempdir().unwrap();
    let mut config = create_test_config(output.path());
    config.detection.model = Some("yolo11n".to_string());

    let orchestrator = CatwatchOrchestrator::new(config).await.unwrap();
    assert_eq!(orchestrator.model().model, "yolo11n");
    assert!(orchestrator.model().overridden);
    assert!(orchestrator.hardware().is_some());

    // No components registered before initialize
    let states = orchestrator.get_all_component_states().await;
    assert!(states.is_empty());
}

#[tokio::test]
async fn test_initialize_registers_components() {
    let output = tempfile::tempdir().unwrap();
    let orchestrator = orchestrator_with(
        create_test_config(output.path()),
        Arc::new(SyntheticConnector::new(64, 48, 100)),
    )
    .await;

    let states = orchestrator.get_all_component_states().await;
    for name in [
        components::CAPTURE,
        components::DATABASE_QUEUE,
        components::FILE_QUEUE,
        components::EVICTION,
        components::HEARTBEAT,
        components::STATUS_FEED,
    ] {
        assert_eq!(states.get(name), Some(&ComponentState::Stopped), "{}", name);
    }
}

#[tokio::test]
async fn test_finite_stream_runs_to_completion() {
    let output = tempfile::tempdir().unwrap();
    let connector = Arc::new(SyntheticConnector::new(64, 48, 100).with_frame_limit(5));
    let mut orchestrator = orchestrator_with(create_test_config(output.path()), connector).await;

    orchestrator.start().await.unwrap();
    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit_code, 0);

    let telemetry = orchestrator.telemetry();
    assert_eq!(telemetry.frames_captured(), 5);
    assert_eq!(
        telemetry.frames_captured(),
        telemetry.frames_processed() + telemetry.frames_skipped()
    );

    let snapshot = telemetry.snapshot();
    assert_eq!(snapshot.metrics.detections_total, 5);

    // One file per frame with a detection, all drained before exit
    let written = std::fs::read_dir(output.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map_or(false, |ext| ext == "jpg"))
        .count();
    assert_eq!(written, 5);

    for (name, state) in orchestrator.get_all_component_states().await {
        assert_eq!(state, ComponentState::Stopped, "{}", name);
    }
}

#[tokio::test]
async fn test_user_request_stops_live_stream() {
    let output = tempfile::tempdir().unwrap();
    let mut orchestrator = orchestrator_with(
        create_test_config(output.path()),
        Arc::new(SyntheticConnector::new(64, 48, 100)),
    )
    .await;

    orchestrator.start().await.unwrap();
    assert_eq!(
        orchestrator.get_component_state(components::CAPTURE).await,
        Some(ComponentState::Running)
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(orchestrator.request_shutdown(ShutdownReason::UserRequest).await);
    // Only the first reason is delivered
    assert!(!orchestrator.request_shutdown(ShutdownReason::StreamEnded).await);

    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(exit_code, 0);

    let telemetry = orchestrator.telemetry();
    assert!(telemetry.frames_captured() > 0);
    assert_eq!(
        telemetry.frames_captured(),
        telemetry.frames_processed() + telemetry.frames_skipped()
    );
    assert!(!telemetry.is_streaming());

    for (name, state) in orchestrator.get_all_component_states().await {
        assert_eq!(state, ComponentState::Stopped, "{}", name);
    }
}

#[tokio::test]
async fn test_fatal_stream_error_exits_with_failure() {
    let output = tempfile::tempdir().unwrap();
    let mut orchestrator =
        orchestrator_with(create_test_config(output.path()), Arc::new(DeadConnector)).await;

    orchestrator.start().await.unwrap();
    let exit_code = tokio::time::timeout(Duration::from_secs(10), orchestrator.run())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(exit_code, 2);
    assert_eq!(
        orchestrator.get_component_state(components::CAPTURE).await,
        Some(ComponentState::Failed)
    );
    assert_eq!(
        orchestrator.get_component_state(components::DATABASE_QUEUE).await,
        Some(ComponentState::Stopped)
    );
    assert_eq!(orchestrator.telemetry().frames_captured(), 0);
    assert_eq!(orchestrator.failed_components().await, vec![components::CAPTURE.to_string()]);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let output = tempfile::tempdir().unwrap();
    let mut config = create_test_config(output.path());
    config.monitoring.enabled = false;
    let mut orchestrator =
        orchestrator_with(config, Arc::new(SyntheticConnector::new(64, 48, 100))).await;

    orchestrator.start().await.unwrap();
    assert!(orchestrator.start().await.is_err());

    orchestrator.request_shutdown(ShutdownReason::UserRequest).await;
    orchestrator.run().await.unwrap();
}

#[test]
fn test_shutdown_reason_exit_codes() {
    assert_eq!(ShutdownReason::Signal("SIGTERM".to_string()).exit_code(), 0);
    assert_eq!(ShutdownReason::UserRequest.exit_code(), 0);
    assert_eq!(ShutdownReason::StreamEnded.exit_code(), 0);
    assert_eq!(ShutdownReason::StreamFailed("gone".to_string()).exit_code(), 2);
}
