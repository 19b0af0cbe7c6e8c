use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One countdown step, tagged with the run that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountdownTick {
    pub generation: u64,
}

struct ActiveCountdown {
    generation: u64,
    cancel: CancellationToken,
}

/// The single countdown timer of a capture flow.
///
/// Starting a run cancels the previous one. Ticks carry the run's
/// generation so a tick already queued by a cancelled run is recognised and
/// dropped by [`CountdownTimer::accepts`].
pub struct CountdownTimer {
    tick: Duration,
    sender: mpsc::UnboundedSender<CountdownTick>,
    generation: u64,
    active: Option<ActiveCountdown>,
}

impl CountdownTimer {
    pub fn new(tick: Duration, sender: mpsc::UnboundedSender<CountdownTick>) -> Self {
        Self {
            tick,
            sender,
            generation: 0,
            active: None,
        }
    }

    /// Start a run emitting `ticks` ticks, one per interval
    pub fn start(&mut self, ticks: u8) {
        self.cancel();

        self.generation += 1;
        let generation = self.generation;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let sender = self.sender.clone();
        let period = self.tick;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            for _ in 0..ticks {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        trace!("Countdown run {} cancelled", generation);
                        return;
                    }
                    _ = ticker.tick() => {
                        if sender.send(CountdownTick { generation }).is_err() {
                            return;
                        }
                    }
                }
            }
        });

        debug!("Countdown run {} started ({} x {:?})", generation, ticks, period);
        self.active = Some(ActiveCountdown { generation, cancel });
    }

    /// Stop the current run, if any
    pub fn cancel(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            debug!("Countdown run {} stopped", active.generation);
        }
    }

    /// Whether a tick belongs to the run in progress
    pub fn accepts(&self, tick: &CountdownTick) -> bool {
        self.active
            .as_ref()
            .map(|active| active.generation == tick.generation)
            .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
