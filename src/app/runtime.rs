use super::{FitcamOrchestrator, ShutdownReason};
use crate::capture::CaptureState;
use crate::error::{FitcamError, Result};
use crate::events::FitcamEvent;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

impl FitcamOrchestrator {
    /// Run until a signal arrives or the capture completes, then shut down
    pub async fn run(&mut self) -> Result<i32> {
        let mut shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| FitcamError::system("Shutdown receiver already taken"))?;

        if let Some(shutdown_sender) = self.shutdown_sender.take() {
            self.setup_signal_handlers(shutdown_sender);
        }

        let mut state = self
            .session_handle
            .as_ref()
            .map(|handle| handle.subscribe_state())
            .ok_or_else(|| FitcamError::system("Capture session is not running"))?;

        info!("fitcam is running");

        let reason = tokio::select! {
            reason = &mut shutdown_receiver => reason.map_err(|_| {
                FitcamError::system("Shutdown channel closed unexpectedly")
            })?,
            finished = state.wait_for(|s| *s == CaptureState::Complete) => match finished {
                Ok(_) => ShutdownReason::CaptureFinished,
                Err(_) => ShutdownReason::Error("Capture session ended unexpectedly".to_string()),
            },
        };

        info!("Shutdown initiated: {}", reason);
        if let Err(e) = self
            .event_bus
            .publish(FitcamEvent::ShutdownRequested {
                timestamp: SystemTime::now(),
                reason: reason.to_string(),
            })
            .await
        {
            tracing::debug!("Shutdown event not delivered: {}", e);
        }

        let exit_code = self.shutdown().await?;
        info!("fitcam shutdown complete");
        Ok(exit_code)
    }

    fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
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

        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });
    }
}
