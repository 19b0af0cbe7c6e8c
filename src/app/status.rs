use crate::capture::CaptureState;
use crate::error::EventBusError;
use crate::events::{EventBus, EventFilter, EventReceiver, FitcamEvent};
use crate::overlay::OverlayModel;
use crate::validation::ValidationSnapshot;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Log the overlay model whenever the capture state or snapshot changes.
///
/// State changes log at info, snapshot-only changes at debug.
pub async fn log_status(
    mut state: watch::Receiver<CaptureState>,
    mut snapshots: watch::Receiver<Arc<ValidationSnapshot>>,
    cancel: CancellationToken,
) {
    let mut last_line = String::new();

    loop {
        let state_changed = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            Ok(()) = state.changed() => true,
            Ok(()) = snapshots.changed() => false,
            else => break,
        };

        let current = *state.borrow_and_update();
        let snapshot = Arc::clone(&snapshots.borrow_and_update());
        let line = OverlayModel::build(&current, &snapshot).to_string();
        if line == last_line {
            continue;
        }

        if state_changed {
            info!("{}", line);
        } else {
            debug!("{}", line);
        }
        last_line = line;
    }

    debug!("Status logger stopped");
}

/// Subscription for [`log_events`]: everything the bus does not log itself
pub(super) fn event_log_receiver(event_bus: &EventBus) -> EventReceiver {
    event_bus.subscribe_filtered(
        EventFilter::Custom(|event| !event.is_logged_by_bus()),
        "event_log",
    )
}

/// Log bus traffic; guidance at info, the rest at debug
pub(super) async fn log_events(mut events: EventReceiver, cancel: CancellationToken) {
    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Ok(event @ FitcamEvent::GuidanceSpoken { .. }) => info!("{}", event.description()),
            Ok(event) => debug!("{}", event.description()),
            Err(e @ EventBusError::Lagged { .. }) => warn!("{}", e),
            Err(_) => break,
        }
    }

    debug!("Event logger '{}' stopped", events.name());
}
