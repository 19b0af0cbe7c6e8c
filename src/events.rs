use crate::camera::CameraState;
use crate::capture::CaptureState;
use crate::error::EventBusError;
use crate::validation::CheckId;
use serde::Serialize;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events that can occur during a capture flow
#[derive(Debug, Clone, Serialize)]
pub enum FitcamEvent {
    /// Camera access state changed
    CameraStateChanged {
        state: CameraState,
        timestamp: SystemTime,
    },
    /// The capture state machine moved to a new state
    CaptureStateChanged {
        from: CaptureState,
        to: CaptureState,
        timestamp: SystemTime,
    },
    /// The set of failing validation checks changed
    ValidationUpdated {
        frame_id: u64,
        face_detected: bool,
        all_checks_passed: bool,
        failing: Vec<CheckId>,
    },
    /// Countdown reached a new number
    CountdownTick { remaining: u8 },
    /// A guidance phrase was handed to the speech synthesizer
    GuidanceSpoken { text: String, check: CheckId },
    /// A capture attempt failed and the flow returned to live preview
    CaptureFailed { reason: String, message: String },
    /// A capture record was produced and delivered
    CaptureCompleted {
        glasses_detected: bool,
        pd: f64,
        face_shape: Option<String>,
        timestamp: SystemTime,
    },
    /// A system error occurred in a component
    SystemError { component: String, error: String },
    /// System shutdown requested
    ShutdownRequested {
        timestamp: SystemTime,
        reason: String,
    },
}

impl FitcamEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            FitcamEvent::CameraStateChanged { timestamp, .. } => *timestamp,
            FitcamEvent::CaptureStateChanged { timestamp, .. } => *timestamp,
            FitcamEvent::CaptureCompleted { timestamp, .. } => *timestamp,
            FitcamEvent::ShutdownRequested { timestamp, .. } => *timestamp,
            _ => SystemTime::now(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            FitcamEvent::CameraStateChanged { state, .. } => {
                format!("Camera {}", state)
            }
            FitcamEvent::CaptureStateChanged { from, to, .. } => {
                format!("Capture state {} -> {}", from, to)
            }
            FitcamEvent::ValidationUpdated {
                frame_id,
                all_checks_passed,
                failing,
                ..
            } => {
                if *all_checks_passed {
                    format!("Frame {}: all checks passed", frame_id)
                } else {
                    let ids: Vec<&str> = failing.iter().map(|id| id.as_str()).collect();
                    format!("Frame {}: failing [{}]", frame_id, ids.join(", "))
                }
            }
            FitcamEvent::CountdownTick { remaining } => format!("Countdown {}", remaining),
            FitcamEvent::GuidanceSpoken { text, .. } => format!("Guidance: {}", text),
            FitcamEvent::CaptureFailed { reason, .. } => format!("Capture failed: {}", reason),
            FitcamEvent::CaptureCompleted {
                glasses_detected,
                pd,
                ..
            } => {
                format!(
                    "Capture completed: PD {:.1} mm (glasses {})",
                    pd,
                    if *glasses_detected {
                        "removed"
                    } else {
                        "not detected"
                    }
                )
            }
            FitcamEvent::SystemError { component, error } => {
                format!("Error in {}: {}", component, error)
            }
            FitcamEvent::ShutdownRequested { reason, .. } => {
                format!("Shutdown requested: {}", reason)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            FitcamEvent::CameraStateChanged { .. } => "camera_state_changed",
            FitcamEvent::CaptureStateChanged { .. } => "capture_state_changed",
            FitcamEvent::ValidationUpdated { .. } => "validation_updated",
            FitcamEvent::CountdownTick { .. } => "countdown_tick",
            FitcamEvent::GuidanceSpoken { .. } => "guidance_spoken",
            FitcamEvent::CaptureFailed { .. } => "capture_failed",
            FitcamEvent::CaptureCompleted { .. } => "capture_completed",
            FitcamEvent::SystemError { .. } => "system_error",
            FitcamEvent::ShutdownRequested { .. } => "shutdown_requested",
        }
    }

    /// Events the bus logs on publish at info level or above
    pub fn is_logged_by_bus(&self) -> bool {
        matches!(
            self,
            FitcamEvent::CaptureCompleted { .. }
                | FitcamEvent::CaptureFailed { .. }
                | FitcamEvent::SystemError { .. }
                | FitcamEvent::ShutdownRequested { .. }
        )
    }
}

/// Async event bus for component coordination using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<FitcamEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<FitcamEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered(&self, filter: EventFilter, name: &str) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.to_string())
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: FitcamEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        // Log important events at appropriate levels
        match &event {
            FitcamEvent::CaptureCompleted { .. } => {
                info!("{}", event.description());
            }
            FitcamEvent::CaptureFailed { reason, .. } => {
                warn!("Capture failed: {}", reason);
            }
            FitcamEvent::SystemError { component, error } => {
                error!("System error in {}: {}", component, error);
            }
            FitcamEvent::ShutdownRequested { reason, .. } => {
                info!("Shutdown requested: {}", reason);
            }
            _ => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Which events a [`EventReceiver`] passes on
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    /// Only these event types
    EventTypes(Vec<&'static str>),
    /// Everything except these event types
    Except(Vec<&'static str>),
    Custom(fn(&FitcamEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &FitcamEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Except(types) => !types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Named bus subscription that skips events its filter rejects
pub struct EventReceiver {
    receiver: broadcast::Receiver<FitcamEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<FitcamEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Next matching event.
    ///
    /// A slow receiver gets `Lagged` once and resumes with the oldest event
    /// still buffered.
    pub async fn recv(&mut self) -> Result<FitcamEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Err(EventBusError::Lagged {
                        receiver: self.name.clone(),
                        skipped,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ProcessingStep;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let event = FitcamEvent::CountdownTick { remaining: 2 };

        let subscriber_count = event_bus.publish(event).await.unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            FitcamEvent::CountdownTick { remaining } => assert_eq!(remaining, 2),
            _ => panic!("Unexpected event type"),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(10);

        let result = event_bus
            .publish(FitcamEvent::CountdownTick { remaining: 1 })
            .await;

        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
        assert!(!event_bus.has_subscribers());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus
            .publish(FitcamEvent::GuidanceSpoken {
                text: "Please keep your eyes open".to_string(),
                check: CheckId::LeftEyeOpen,
            })
            .await
            .unwrap();

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut filtered =
            event_bus.subscribe_filtered(EventFilter::EventTypes(vec!["capture_failed"]), "test");

        event_bus
            .publish(FitcamEvent::CountdownTick { remaining: 3 })
            .await
            .unwrap();
        event_bus
            .publish(FitcamEvent::CaptureFailed {
                reason: "Landmark detection was rejected by the measurement service".to_string(),
                message: "Failed to process image. Please try again.".to_string(),
            })
            .await
            .unwrap();

        let event = timeout(Duration::from_millis(100), filtered.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "capture_failed");
        assert!(timeout(Duration::from_millis(50), filtered.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_receiver_skips_events_logged_by_bus() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_filtered(
            EventFilter::Custom(|event| !event.is_logged_by_bus()),
            "event_log",
        );
        assert_eq!(receiver.name(), "event_log");

        event_bus
            .publish(FitcamEvent::SystemError {
                component: "capture_sink".to_string(),
                error: "disk full".to_string(),
            })
            .await
            .unwrap();
        event_bus
            .publish(FitcamEvent::GuidanceSpoken {
                text: "Please look straight at the camera".to_string(),
                check: CheckId::HeadRotation,
            })
            .await
            .unwrap();

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "guidance_spoken");
    }

    #[tokio::test]
    async fn test_lagged_receiver_reports_and_resumes() {
        let event_bus = EventBus::new(2);
        let mut receiver = event_bus.subscribe_filtered(EventFilter::All, "slow");

        for remaining in (0..5).rev() {
            event_bus
                .publish(FitcamEvent::CountdownTick { remaining })
                .await
                .unwrap();
        }

        match receiver.recv().await {
            Err(EventBusError::Lagged {
                receiver: name,
                skipped,
            }) => {
                assert_eq!(name, "slow");
                assert_eq!(skipped, 3);
            }
            other => panic!("Expected lag, got {:?}", other),
        }

        match receiver.recv().await.unwrap() {
            FitcamEvent::CountdownTick { remaining } => assert_eq!(remaining, 1),
            other => panic!("Unexpected event {:?}", other),
        }
        assert!(receiver.recv().await.is_ok());

        drop(event_bus);
        assert!(matches!(
            receiver.recv().await,
            Err(EventBusError::ChannelClosed)
        ));
    }

    #[test]
    fn test_event_descriptions() {
        let event = FitcamEvent::CaptureStateChanged {
            from: CaptureState::Countdown(0),
            to: CaptureState::Processing(ProcessingStep::DetectGlasses),
            timestamp: SystemTime::now(),
        };
        assert_eq!(
            event.description(),
            "Capture state countdown(0) -> processing(detect_glasses)"
        );

        let event = FitcamEvent::ValidationUpdated {
            frame_id: 7,
            face_detected: true,
            all_checks_passed: false,
            failing: vec![CheckId::Distance, CheckId::Brightness],
        };
        assert_eq!(event.description(), "Frame 7: failing [distance, brightness]");

        let filter = EventFilter::Except(vec!["validation_updated"]);
        assert!(!filter.matches(&event));
        assert!(filter.matches(&FitcamEvent::CountdownTick { remaining: 1 }));
    }
}
