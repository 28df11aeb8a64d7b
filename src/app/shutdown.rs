use super::types::components;
use super::{CatwatchOrchestrator, ComponentState};
use crate::error::{CatwatchError, Result};
use crate::persistence::WorkerReport;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

const CAPTURE_STOP_TIMEOUT: Duration = Duration::from_secs(10);
const BACKGROUND_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const QUEUE_STOP_GRACE: Duration = Duration::from_secs(5);

impl CatwatchOrchestrator {
    /// Stop components in dependency order: capture first so nothing new is
    /// enqueued, then drain the persistence queues, then the rest
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        let mut exit_code = 0;

        self.tokens.capture.cancel();
        let capture = self.tasks.capture.take();
        if let Err(e) = self
            .stop_component(components::CAPTURE, capture, CAPTURE_STOP_TIMEOUT)
            .await
        {
            error!("Error stopping capture: {}", e);
            exit_code = 1;
        }

        self.tokens.queues.cancel();
        let queue_timeout = self.config.storage.drain_timeout() + QUEUE_STOP_GRACE;
        let database = self.tasks.database_queue.take();
        match self
            .stop_component(components::DATABASE_QUEUE, database, queue_timeout)
            .await
        {
            Ok(report) => log_worker_report(components::DATABASE_QUEUE, report),
            Err(e) => {
                error!("Error stopping database queue: {}", e);
                exit_code = 1;
            }
        }
        let files = self.tasks.file_queue.take();
        match self
            .stop_component(components::FILE_QUEUE, files, queue_timeout)
            .await
        {
            Ok(report) => log_worker_report(components::FILE_QUEUE, report),
            Err(e) => {
                error!("Error stopping file queue: {}", e);
                exit_code = 1;
            }
        }

        self.tokens.background.cancel();
        let background = [
            (components::EVICTION, self.tasks.eviction.take()),
            (components::HEARTBEAT, self.tasks.heartbeat.take()),
            (components::STATUS_FEED, self.tasks.status_feed.take()),
        ];
        for (component, handle) in background {
            if let Err(e) = self
                .stop_component(component, handle, BACKGROUND_STOP_TIMEOUT)
                .await
            {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        self.tokens.server.cancel();
        #[cfg(feature = "streaming")]
        {
            if self.status_server.is_some() {
                let server = self.tasks.status_server.take();
                match self
                    .stop_component(components::STATUS_SERVER, server, BACKGROUND_STOP_TIMEOUT)
                    .await
                {
                    Ok(Some(Err(e))) => {
                        error!("Monitoring server failed: {}", e);
                        self.set_component_state(components::STATUS_SERVER, ComponentState::Failed)
                            .await;
                        exit_code = 1;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error stopping monitoring server: {}", e);
                        exit_code = 1;
                    }
                }
            }
        }

        self.tokens.root.cancel();

        let failed = self.failed_components().await;
        if !failed.is_empty() {
            warn!("Components ended in a failed state: {}", failed.join(", "));
        }
        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Wait for a component task to finish after its token was cancelled
    async fn stop_component<T>(
        &self,
        component: &str,
        handle: Option<JoinHandle<T>>,
        limit: Duration,
    ) -> Result<Option<T>> {
        let Some(handle) = handle else {
            self.set_component_state(component, ComponentState::Stopped)
                .await;
            return Ok(None);
        };

        info!("Stopping {} component", component);
        let already_failed =
            self.get_component_state(component).await == Some(ComponentState::Failed);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match timeout(limit, handle).await {
            Ok(Ok(output)) => {
                let state = if already_failed {
                    ComponentState::Failed
                } else {
                    ComponentState::Stopped
                };
                self.set_component_state(component, state).await;
                info!("{} component stopped", component);
                Ok(Some(output))
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(CatwatchError::component(
                    component,
                    format!("Task terminated abnormally: {}", e),
                ))
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("{} component stop timeout", component);
                Err(CatwatchError::component(
                    component,
                    format!("Stop timed out after {:?}", limit),
                ))
            }
        }
    }
}

fn log_worker_report(queue: &str, report: Option<WorkerReport>) {
    let Some(report) = report else { return };
    if report.abandoned > 0 {
        warn!(
            "{} queue abandoned {} items at shutdown ({} written, {} failed)",
            queue, report.abandoned, report.processed, report.failed
        );
    } else {
        info!(
            "{} queue drained ({} written, {} failed)",
            queue, report.processed, report.failed
        );
    }
}
