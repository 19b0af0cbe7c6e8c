use super::{ComponentState, FitcamOrchestrator};
use crate::capture::SessionOutcome;
use crate::error::{FitcamError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info, warn};

impl FitcamOrchestrator {
    /// Stop the session first so the camera is released, then the observers
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        let mut exit_code = 0;

        if let Err(e) = self.stop_session().await {
            error!("Error stopping session: {}", e);
            exit_code = 1;
        }

        self.cancellation_token.cancel();

        for (component, task) in [
            ("status", self.status_task.take()),
            ("events", self.event_log_task.take()),
        ] {
            if let Err(e) = self.stop_task(component, task).await {
                error!("Error stopping {}: {}", component, e);
                exit_code = 1;
            }
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    async fn stop_session(&mut self) -> Result<()> {
        let Some(handle) = self.session_handle.take() else {
            self.set_component_state("session", ComponentState::Stopped)
                .await;
            return Ok(());
        };

        handle.shutdown();
        let outcome = self
            .stop_with_timeout("session", Duration::from_secs(10), handle.join())
            .await?;

        match outcome {
            SessionOutcome::Completed(data) => info!(
                "Session finished with a capture (PD {:.1} mm, glasses {})",
                data.measurements().pd,
                data.glasses_detected()
            ),
            SessionOutcome::Cancelled => warn!("Session ended without a capture"),
        }
        Ok(())
    }

    async fn stop_task(&self, component: &str, task: Option<JoinHandle<()>>) -> Result<()> {
        let Some(task) = task else {
            self.set_component_state(component, ComponentState::Stopped)
                .await;
            return Ok(());
        };

        self.stop_with_timeout(component, Duration::from_secs(2), async move {
            task.await
                .map_err(|e| FitcamError::component(component, e.to_string()))
        })
        .await
    }

    async fn stop_with_timeout<T, F>(&self, component: &str, limit: Duration, stop: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        match timeout(limit, stop).await {
            Ok(Ok(value)) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(value)
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                Err(FitcamError::system(format!(
                    "{} component stop timeout",
                    component
                )))
            }
        }
    }
}
