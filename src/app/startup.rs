use super::types::components;
use super::{CatwatchOrchestrator, ComponentState, ShutdownReason};
use crate::error::{CatwatchError, Result};
use crate::pipeline::PipelineExit;
use std::sync::Arc;
use tracing::{error, info, warn};

impl CatwatchOrchestrator {
    fn component_names(&self) -> Vec<&'static str> {
        #[allow(unused_mut)]
        let mut names = vec![
            components::CAPTURE,
            components::DATABASE_QUEUE,
            components::FILE_QUEUE,
            components::EVICTION,
            components::HEARTBEAT,
            components::STATUS_FEED,
        ];
        #[cfg(feature = "streaming")]
        {
            if self.status_server.is_some() {
                names.push(components::STATUS_SERVER);
            }
        }
        names
    }

    /// Register every component as stopped
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing Catwatch components");

        let names = self.component_names();
        let mut states = self.component_states.lock().await;
        for name in names {
            states.insert(name.to_string(), ComponentState::Stopped);
        }
        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start every component; persistence workers come up before the
    /// capture loop so no accepted item waits on a missing consumer
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Catwatch for camera '{}'", self.config.storage.camera_name);

        self.set_component_state(components::STATUS_FEED, ComponentState::Starting)
            .await;
        let feed = Arc::clone(&self.feed);
        let cancel = self.tokens.background.clone();
        self.tasks.status_feed = Some(tokio::spawn(feed.run(cancel)));
        self.set_component_state(components::STATUS_FEED, ComponentState::Running)
            .await;

        #[cfg(feature = "streaming")]
        self.start_status_server().await?;

        let database_worker = self.database_worker.take().ok_or_else(|| {
            CatwatchError::component(components::DATABASE_QUEUE, "Worker already started")
        })?;
        let file_worker = self.file_worker.take().ok_or_else(|| {
            CatwatchError::component(components::FILE_QUEUE, "Worker already started")
        })?;
        self.set_component_state(components::DATABASE_QUEUE, ComponentState::Starting)
            .await;
        self.tasks.database_queue = Some(tokio::spawn(database_worker.run(self.tokens.queues.clone())));
        self.set_component_state(components::DATABASE_QUEUE, ComponentState::Running)
            .await;
        self.set_component_state(components::FILE_QUEUE, ComponentState::Starting)
            .await;
        self.tasks.file_queue = Some(tokio::spawn(file_worker.run(self.tokens.queues.clone())));
        self.set_component_state(components::FILE_QUEUE, ComponentState::Running)
            .await;

        self.set_component_state(components::EVICTION, ComponentState::Starting)
            .await;
        self.tasks.eviction = Some(tokio::spawn(Arc::clone(&self.eviction).run(
            self.config.storage.eviction_interval(),
            Arc::clone(&self.telemetry),
            self.tokens.background.clone(),
        )));
        self.set_component_state(components::EVICTION, ComponentState::Running)
            .await;

        self.set_component_state(components::HEARTBEAT, ComponentState::Starting)
            .await;
        self.tasks.heartbeat = Some(tokio::spawn(Arc::clone(&self.notifier).run_heartbeat(
            self.config.notification.heartbeat_interval(),
            self.tokens.background.clone(),
        )));
        self.set_component_state(components::HEARTBEAT, ComponentState::Running)
            .await;

        self.start_capture().await?;

        info!("Catwatch started");
        Ok(())
    }

    async fn start_capture(&mut self) -> Result<()> {
        let pipeline = self
            .pipeline
            .take()
            .ok_or_else(|| CatwatchError::component(components::CAPTURE, "Pipeline already started"))?;

        // Marked running before the spawn so a fast failure is not overwritten
        self.set_component_state(components::CAPTURE, ComponentState::Running)
            .await;

        let cancel = self.tokens.capture.clone();
        let states = Arc::clone(&self.component_states);
        let shutdown_sender = Arc::clone(&self.shutdown_sender);

        self.tasks.capture = Some(tokio::spawn(async move {
            let reason = match pipeline.run(cancel).await {
                Ok(PipelineExit::Cancelled) => None,
                Ok(PipelineExit::EndOfStream) => {
                    info!("Frame source reached end of stream");
                    Some(ShutdownReason::StreamEnded)
                }
                Err(e) => {
                    error!("Capture stopped on fatal stream error: {}", e);
                    states
                        .lock()
                        .await
                        .insert(components::CAPTURE.to_string(), ComponentState::Failed);
                    Some(ShutdownReason::StreamFailed(e.to_string()))
                }
            };

            if let Some(reason) = reason {
                if let Some(sender) = shutdown_sender.lock().await.take() {
                    let _ = sender.send(reason);
                }
            }
        }));

        info!("Capture loop started");
        Ok(())
    }

    #[cfg(feature = "streaming")]
    async fn start_status_server(&mut self) -> Result<()> {
        let Some(server) = self.status_server.as_ref().map(Arc::clone) else {
            info!("Monitoring server disabled");
            return Ok(());
        };

        self.set_component_state(components::STATUS_SERVER, ComponentState::Starting)
            .await;

        let listener = match server.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.set_component_state(components::STATUS_SERVER, ComponentState::Failed)
                    .await;
                error!("Failed to start monitoring server: {}", e);
                return Err(e);
            }
        };

        let cancel = self.tokens.server.clone();
        self.tasks.status_server = Some(tokio::spawn(async move {
            let result = server.serve(listener, cancel).await;
            if let Err(e) = &result {
                warn!("Monitoring server exited with error: {}", e);
            }
            result
        }));

        self.set_component_state(components::STATUS_SERVER, ComponentState::Running)
            .await;
        Ok(())
    }
}
