use super::{CatwatchOrchestrator, ShutdownReason};
use crate::error::{CatwatchError, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

impl CatwatchOrchestrator {
    /// Block until a signal, a fatal stream error or an explicit request,
    /// then shut down and return the process exit code
    pub async fn run(&mut self) -> Result<i32> {
        info!("Catwatch is running");

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| CatwatchError::system("Shutdown receiver already taken"))?;

        Self::setup_signal_handlers(Arc::clone(&self.shutdown_sender));

        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| CatwatchError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let shutdown_code = self.shutdown().await?;
        let exit_code = shutdown_reason.exit_code().max(shutdown_code);

        info!("Catwatch shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(shutdown_sender: Arc<Mutex<Option<oneshot::Sender<ShutdownReason>>>>) {
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
