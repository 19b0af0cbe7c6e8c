use std::fmt;
use std::path::PathBuf;

/// Component lifecycle states
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

/// Why the application is shutting down
#[derive(Debug, Clone, PartialEq)]
pub enum ShutdownReason {
    Signal(String),
    Error(String),
    UserRequest,
    CaptureFinished,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownReason::Signal(signal) => write!(f, "signal {}", signal),
            ShutdownReason::Error(message) => write!(f, "error: {}", message),
            ShutdownReason::UserRequest => f.write_str("user request"),
            ShutdownReason::CaptureFinished => f.write_str("capture finished"),
        }
    }
}

/// Collaborator choices made on the command line
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Landmark script to replay instead of the built-in demo
    pub replay: Option<PathBuf>,
    /// Answer measurement requests locally instead of calling the service
    pub offline: bool,
}
