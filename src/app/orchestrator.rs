use super::types::{ComponentState, RunOptions, ShutdownReason};
use crate::capture::{CaptureSession, SessionHandle};
use crate::config::FitcamConfig;
use crate::error::Result;
use crate::events::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Names of the components the orchestrator tracks
pub(super) const COMPONENTS: [&str; 3] = ["session", "status", "events"];

/// Wires configured collaborators into a capture session and runs it
pub struct FitcamOrchestrator {
    pub(super) config: FitcamConfig,
    pub(super) options: RunOptions,
    pub(super) event_bus: EventBus,

    // Components
    pub(super) session: Option<CaptureSession>,
    pub(super) session_handle: Option<SessionHandle>,
    pub(super) status_task: Option<JoinHandle<()>>,
    pub(super) event_log_task: Option<JoinHandle<()>>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
}

impl FitcamOrchestrator {
    pub fn new(config: FitcamConfig, options: RunOptions) -> Result<Self> {
        config.validate()?;

        let event_bus = EventBus::new(config.system.event_bus_capacity);
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();

        Ok(Self {
            config,
            options,
            event_bus,
            session: None,
            session_handle: None,
            status_task: None,
            event_log_task: None,
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn session_handle(&self) -> Option<&SessionHandle> {
        self.session_handle.as_ref()
    }

    /// Sender that ends [`FitcamOrchestrator::run`]; taken at most once
    pub fn take_shutdown_sender(&mut self) -> Option<oneshot::Sender<ShutdownReason>> {
        self.shutdown_sender.take()
    }

    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        let mut states = self.component_states.lock().await;
        debug!("Component '{}' -> {:?}", component, state);
        states.insert(component.to_string(), state);
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        self.component_states.lock().await.get(component).cloned()
    }

    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        self.component_states.lock().await.clone()
    }
}
