mod countdown;
mod machine;
mod session;
mod sink;
mod state;
#[cfg(test)]
mod tests;

pub use countdown::{CountdownTick, CountdownTimer};
pub use machine::{CaptureStateMachine, MachineAction, MachineInput, Outcome, Transition};
pub use session::{
    CaptureSession, CaptureSessionBuilder, SessionCommand, SessionHandle, SessionOutcome,
};
pub use sink::{CaptureSink, ChannelSink, JsonFileSink, LogSink};
pub use state::{CaptureState, ProcessingStep};
