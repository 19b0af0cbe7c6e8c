use serde::{Deserialize, Serialize};
use std::fmt;

/// Stage of the measurement pipeline currently running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStep {
    DetectGlasses,
    RemoveGlasses,
    DetectLandmarks,
}

impl ProcessingStep {
    /// Label shown to the user while the step runs
    pub fn label(&self) -> &'static str {
        match self {
            ProcessingStep::DetectGlasses => "Detecting glasses...",
            ProcessingStep::RemoveGlasses => "Removing glasses...",
            ProcessingStep::DetectLandmarks => "Measuring face dimensions...",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStep::DetectGlasses => "detect_glasses",
            ProcessingStep::RemoveGlasses => "remove_glasses",
            ProcessingStep::DetectLandmarks => "detect_landmarks",
        }
    }
}

impl fmt::Display for ProcessingStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessingStep::DetectGlasses => "Glasses detection",
            ProcessingStep::RemoveGlasses => "Glasses removal",
            ProcessingStep::DetectLandmarks => "Landmark detection",
        };
        f.write_str(name)
    }
}

/// State of one guided capture flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum CaptureState {
    AwaitingPermission,
    Live,
    Countdown(u8),
    Processing(ProcessingStep),
    Complete,
    Failed,
}

impl CaptureState {
    /// Countdown running or the pipeline in flight
    pub fn is_capturing(&self) -> bool {
        matches!(self, CaptureState::Countdown(_) | CaptureState::Processing(_))
    }

    /// States in which the validation loop keeps sampling frames
    pub fn samples_validation(&self) -> bool {
        matches!(self, CaptureState::Live | CaptureState::Countdown(_))
    }

    pub fn countdown(&self) -> Option<u8> {
        match self {
            CaptureState::Countdown(n) => Some(*n),
            _ => None,
        }
    }

    pub fn processing_step(&self) -> Option<ProcessingStep> {
        match self {
            CaptureState::Processing(step) => Some(*step),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::AwaitingPermission => "awaiting_permission",
            CaptureState::Live => "live",
            CaptureState::Countdown(_) => "countdown",
            CaptureState::Processing(_) => "processing",
            CaptureState::Complete => "complete",
            CaptureState::Failed => "failed",
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureState::Countdown(n) => write!(f, "countdown({})", n),
            CaptureState::Processing(step) => write!(f, "processing({})", step.as_str()),
            other => f.write_str(other.name()),
        }
    }
}
