mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod status;
mod types;


pub use orchestrator::FitcamOrchestrator;
pub use status::log_status;
pub use types::{ComponentState, RunOptions, ShutdownReason};
