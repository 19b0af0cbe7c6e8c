use super::orchestrator::COMPONENTS;
use super::status::{event_log_receiver, log_events, log_status};
use super::{ComponentState, FitcamOrchestrator};
use crate::camera::device_from_config;
use crate::capture::{CaptureSession, CaptureSink, JsonFileSink, LogSink};
use crate::error::{FitcamError, Result};
use crate::pipeline::{FixedMeasurementService, MeasurementService};
use crate::validation::ScriptedDetector;
use crate::voice::speech_from_config;
use std::sync::Arc;
use tracing::{info, warn};

impl FitcamOrchestrator {
    /// Build every collaborator and the capture session without starting anything
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing fitcam components");

        for component in COMPONENTS {
            self.set_component_state(component, ComponentState::Stopped)
                .await;
        }

        let camera = device_from_config(&self.config.camera)?;
        info!("Camera backend: {}", camera.name());

        let detector = match &self.options.replay {
            Some(path) => {
                let detector = ScriptedDetector::from_file(path).await?;
                info!(
                    "Replaying landmark script {} ({:?})",
                    path.display(),
                    detector.duration()
                );
                detector
            }
            None => {
                info!("No landmark script given, using the built-in demo script");
                ScriptedDetector::demo()
            }
        };

        let service = self.measurement_service()?;

        let sink: Arc<dyn CaptureSink> = if self.config.output.save_capture {
            Arc::new(JsonFileSink::new(&self.config.output.path))
        } else {
            Arc::new(LogSink)
        };

        let session = CaptureSession::builder(self.config.clone())
            .camera(camera)
            .detector(Arc::new(detector))
            .speech(speech_from_config(&self.config.voice))
            .measurement_service(service)
            .sink(sink)
            .event_bus(self.event_bus.clone())
            .build()?;
        self.session = Some(session);

        info!("All components initialized");
        Ok(())
    }

    fn measurement_service(&self) -> Result<Arc<dyn MeasurementService>> {
        if self.options.offline {
            info!("Offline mode, measurements are answered locally");
            return Ok(Arc::new(FixedMeasurementService::new()));
        }

        #[cfg(feature = "http")]
        {
            let service = crate::pipeline::HttpMeasurementService::new(&self.config.pipeline)?;
            Ok(Arc::new(service))
        }

        #[cfg(not(feature = "http"))]
        {
            warn!("Built without the `http` feature, falling back to offline measurements");
            Ok(Arc::new(FixedMeasurementService::new()))
        }
    }

    /// Start the capture session and its observers
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting fitcam");

        let session = self
            .session
            .take()
            .ok_or_else(|| FitcamError::system("Orchestrator was not initialized"))?;

        self.set_component_state("events", ComponentState::Starting)
            .await;
        self.event_log_task = Some(tokio::spawn(log_events(
            event_log_receiver(&self.event_bus),
            self.cancellation_token.child_token(),
        )));
        self.set_component_state("events", ComponentState::Running)
            .await;

        self.set_component_state("session", ComponentState::Starting)
            .await;
        let handle = session.spawn();
        self.set_component_state("session", ComponentState::Running)
            .await;

        self.set_component_state("status", ComponentState::Starting)
            .await;
        self.status_task = Some(tokio::spawn(log_status(
            handle.subscribe_state(),
            handle.snapshots(),
            self.cancellation_token.child_token(),
        )));
        self.set_component_state("status", ComponentState::Running)
            .await;

        if !self.event_bus.has_subscribers() {
            warn!("No event subscribers registered");
        }

        self.session_handle = Some(handle);
        info!("fitcam started");
        Ok(())
    }
}
