use crate::capture::ProcessingStep;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FitcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config serialization error: {0}")]
    ConfigSerialization(#[from] toml::ser::Error),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Image error: {details}")]
    Image { details: String },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl FitcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether the capture flow can carry on after this error
    pub fn is_recoverable(&self) -> bool {
        match self {
            FitcamError::Camera(_) | FitcamError::Detection(_) | FitcamError::Pipeline(_) => true,
            FitcamError::EventBus(EventBusError::PublishFailed { .. }) => true,
            FitcamError::EventBus(EventBusError::Lagged { .. }) => true,
            FitcamError::Image { .. } => true,
            _ => false,
        }
    }
}

impl From<image::ImageError> for FitcamError {
    fn from(err: image::ImageError) -> Self {
        FitcamError::Image {
            details: err.to_string(),
        }
    }
}

/// Camera acquisition failures, surfaced to the user with a retry affordance
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Camera permission denied: {details}")]
    PermissionDenied { details: String },

    #[error("No camera device found: {details}")]
    NotFound { details: String },

    #[error("Camera unavailable: {details}")]
    Unavailable { details: String },

    #[error("Camera stream ended")]
    StreamEnded,
}

impl CameraError {
    /// Human-readable reason shown next to the retry button
    pub fn user_message(&self) -> &'static str {
        match self {
            CameraError::PermissionDenied { .. } => {
                "Camera access was denied. Please allow camera access in your settings."
            }
            CameraError::NotFound { .. } => {
                "No camera found. Please connect a camera and try again."
            }
            CameraError::Unavailable { .. } | CameraError::StreamEnded => {
                "Failed to access camera. Please try again."
            }
        }
    }
}

/// Landmark detection failures; these only ever degrade a single validation cycle
#[derive(Error, Debug, Clone)]
pub enum DetectionError {
    #[error("Landmark detection failed: {details}")]
    Failed { details: String },

    #[error("Invalid detector script: {details}")]
    Script { details: String },
}

/// Notification shown whenever a capture attempt fails
pub const PROCESSING_FAILURE_MESSAGE: &str = "Failed to process image. Please try again.";

/// Failure of a single capture attempt
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    #[error("{stage} was rejected by the measurement service")]
    Rejected { stage: ProcessingStep },

    #[error("{stage} failed: {details}")]
    Stage {
        stage: ProcessingStep,
        details: String,
    },

    #[error("Measurement response did not contain millimetre measurements")]
    MissingMeasurements,

    #[error("{stage} timed out after {after:?}")]
    Timeout {
        stage: ProcessingStep,
        after: Duration,
    },

    #[error("Capture processing was cancelled")]
    Cancelled,

    #[error("Failed to capture frame: {details}")]
    Capture { details: String },

    #[error("No camera frame available for capture")]
    NoFrame,

    #[error("No face landmarks available for capture")]
    NoLandmarks,
}

impl PipelineError {
    pub fn stage<S: Into<String>>(stage: ProcessingStep, details: S) -> Self {
        Self::Stage {
            stage,
            details: details.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout { .. })
    }

    /// Transient notification text shown to the user
    pub fn user_message(&self) -> &'static str {
        PROCESSING_FAILURE_MESSAGE
    }
}

#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver '{receiver}' lagged behind by {skipped} events")]
    Lagged { receiver: String, skipped: u64 },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, FitcamError>;
