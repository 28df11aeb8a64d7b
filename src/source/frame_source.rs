use super::connector::{StreamConnection, StreamConnector};
use super::state::{ConnectionState, StateTransition};
use crate::config::{ConnectionMode, StreamConfig};
use crate::error::StreamError;
use crate::frame::Frame;
use crate::recovery::{RecoveryAction, RecoveryConfig, RecoveryManager};
use crate::telemetry::{Stage, TelemetryAggregator};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

const TRANSITION_HISTORY: usize = 64;
const COMPONENT: &str = "frame_source";
/// Slack on top of the configured timeouts. Connectors enforce the timeouts
/// themselves; the source only cuts off a connector that ignores them.
const CONNECTOR_GRACE: Duration = Duration::from_millis(250);

/// Result of one [`FrameSource::next`] call
#[derive(Debug)]
pub enum SourceEvent {
    Frame(Frame),
    /// A finite stream ran out of frames
    EndOfStream,
    /// A connect or read failed; the source will retry on the next call
    TransientError(StreamError),
}

/// Tuning for a [`FrameSource`]
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub mode: ConnectionMode,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub recovery: RecoveryConfig,
}

impl From<&StreamConfig> for SourceSettings {
    fn from(config: &StreamConfig) -> Self {
        Self {
            mode: config.connection_mode,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            recovery: RecoveryConfig::from(config),
        }
    }
}

/// Owns the stream connection and drives the reconnection state machine.
///
/// ```text
/// Disconnected -> Connecting -> Streaming
/// Connecting -> Reconnecting | FatalError
/// Streaming -> Reconnecting (read failure)
/// Reconnecting -> Connecting (after backoff)
/// ```
///
/// In reconnect-per-frame mode the connection is torn down after every
/// frame and the machine returns to `Disconnected`.
pub struct FrameSource {
    connector: Arc<dyn StreamConnector>,
    settings: SourceSettings,
    recovery: RecoveryManager,
    connection: Option<Box<dyn StreamConnection>>,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    transitions: VecDeque<StateTransition>,
    pending_delay: Option<Duration>,
    last_error: Option<StreamError>,
    sequence: u64,
    telemetry: Option<Arc<TelemetryAggregator>>,
}

impl FrameSource {
    pub fn new(connector: Arc<dyn StreamConnector>, settings: SourceSettings) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let recovery = RecoveryManager::new(settings.recovery.clone());

        Self {
            connector,
            settings,
            recovery,
            connection: None,
            state: ConnectionState::Disconnected,
            state_tx,
            transitions: VecDeque::with_capacity(TRANSITION_HISTORY),
            pending_delay: None,
            last_error: None,
            sequence: 0,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryAggregator>) -> Self {
        telemetry.set_connection_state(self.state);
        self.telemetry = Some(telemetry);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// States entered so far, oldest first (bounded history)
    pub fn state_history(&self) -> Vec<ConnectionState> {
        self.transitions.iter().map(|t| t.to).collect()
    }

    pub fn transitions(&self) -> Vec<StateTransition> {
        self.transitions.iter().cloned().collect()
    }

    pub fn frames_produced(&self) -> u64 {
        self.sequence
    }

    /// Make one connection attempt and report the resulting state
    pub async fn open(&mut self) -> ConnectionState {
        info!("Opening stream {}", self.connector.describe());
        match self.state {
            ConnectionState::FatalError | ConnectionState::Streaming => self.state,
            _ => {
                self.connect_once().await;
                self.state
            }
        }
    }

    /// Pull the next event from the stream.
    ///
    /// `Err` is returned only once the retry budget is exhausted; the source
    /// stays in `FatalError` afterwards.
    pub async fn next(&mut self) -> Result<SourceEvent, StreamError> {
        loop {
            match self.state {
                ConnectionState::FatalError => return Err(self.fatal_error()),
                ConnectionState::Disconnected | ConnectionState::Connecting => {
                    if let Some(err) = self.connect_once().await {
                        return self.after_connect_failure(err);
                    }
                }
                ConnectionState::Reconnecting => {
                    if let Some(delay) = self.pending_delay.take() {
                        debug!("Waiting {:?} before reconnecting", delay);
                        tokio::time::sleep(delay).await;
                    }
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_reconnect();
                    }
                    if let Some(err) = self.connect_once().await {
                        return self.after_connect_failure(err);
                    }
                }
                ConnectionState::Streaming => return Ok(self.read_once().await),
            }
        }
    }

    /// Tear down the connection
    pub async fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        if self.state != ConnectionState::FatalError {
            self.transition(ConnectionState::Disconnected);
        }
        info!("Stream source closed after {} frames", self.sequence);
    }

    fn after_connect_failure(&self, err: StreamError) -> Result<SourceEvent, StreamError> {
        if self.state == ConnectionState::FatalError {
            Err(self.fatal_error())
        } else {
            Ok(SourceEvent::TransientError(err))
        }
    }

    fn fatal_error(&self) -> StreamError {
        StreamError::RetriesExhausted {
            attempts: self.recovery.consecutive_failures(),
            last_error: self
                .last_error
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// One connect attempt; returns the error when it failed
    async fn connect_once(&mut self) -> Option<StreamError> {
        self.transition(ConnectionState::Connecting);
        let started = Instant::now();

        let result = match timeout(self.settings.connect_timeout + CONNECTOR_GRACE, self.connector.connect()).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::ConnectTimeout {
                url: self.connector.describe(),
                timeout: self.settings.connect_timeout,
            }),
        };

        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.recovery.reset(COMPONENT);
                self.last_error = None;
                if self.settings.mode == ConnectionMode::ReconnectPerFrame {
                    if let Some(telemetry) = &self.telemetry {
                        telemetry.record_stage(Stage::Reconnect, started.elapsed());
                    }
                }
                self.transition(ConnectionState::Streaming);
                None
            }
            Err(err) => {
                self.last_error = Some(err.clone());
                match self.recovery.handle_failure(COMPONENT, &err) {
                    RecoveryAction::RetryAfterDelay(delay) => {
                        self.pending_delay = Some(delay);
                        self.transition(ConnectionState::Reconnecting);
                    }
                    RecoveryAction::GiveUp => {
                        error!("Stream {} unreachable, giving up", self.connector.describe());
                        self.transition(ConnectionState::FatalError);
                    }
                }
                Some(err)
            }
        }
    }

    async fn read_once(&mut self) -> SourceEvent {
        let Some(connection) = self.connection.as_mut() else {
            self.transition(ConnectionState::Disconnected);
            return SourceEvent::TransientError(StreamError::NotOpen);
        };

        let started = Instant::now();
        let result = match timeout(self.settings.read_timeout + CONNECTOR_GRACE, connection.read_frame()).await {
            Ok(result) => result,
            Err(_) => Err(StreamError::ReadTimeout {
                timeout: self.settings.read_timeout,
            }),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(Some(image)) => {
                self.sequence += 1;
                let frame = Frame::new(self.sequence, image);
                if let Some(telemetry) = &self.telemetry {
                    telemetry.record_stage(Stage::Read, elapsed);
                }

                if self.settings.mode == ConnectionMode::ReconnectPerFrame {
                    self.drop_connection().await;
                    self.transition(ConnectionState::Disconnected);
                }

                SourceEvent::Frame(frame)
            }
            Ok(None) => {
                info!("Stream {} reached end of stream", self.connector.describe());
                self.drop_connection().await;
                self.transition(ConnectionState::Disconnected);
                SourceEvent::EndOfStream
            }
            Err(err) => {
                warn!("Frame read failed: {}", err);
                self.drop_connection().await;
                self.pending_delay =
                    Some(self.recovery.calculate_delay(self.recovery.consecutive_failures()));
                self.last_error = Some(err.clone());
                self.transition(ConnectionState::Reconnecting);
                SourceEvent::TransientError(err)
            }
        }
    }

    async fn drop_connection(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from == to && to != ConnectionState::Connecting {
            return;
        }

        self.state = to;
        if self.transitions.len() == TRANSITION_HISTORY {
            self.transitions.pop_front();
        }
        self.transitions.push_back(StateTransition {
            from,
            to,
            at: SystemTime::now(),
        });

        self.state_tx.send_replace(to);
        if let Some(telemetry) = &self.telemetry {
            telemetry.set_connection_state(to);
        }
        debug!("Stream state {} -> {}", from, to);
    }
}
