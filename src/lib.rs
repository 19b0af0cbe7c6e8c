pub mod app;
pub mod camera;
pub mod capture;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod overlay;
pub mod pipeline;
pub mod validation;
pub mod voice;

pub use app::{ComponentState, FitcamOrchestrator, RunOptions, ShutdownReason};
pub use camera::{CameraAccessManager, CameraState, FrameSource, MediaDevice, MediaStream};
pub use capture::{
    CaptureSession, CaptureSessionBuilder, CaptureSink, CaptureState, CaptureStateMachine,
    ProcessingStep, SessionHandle, SessionOutcome,
};
pub use config::FitcamConfig;
pub use error::{FitcamError, Result};
pub use events::{EventBus, EventFilter, EventReceiver, FitcamEvent};
pub use frame::{FrameData, FrameFormat};
pub use overlay::OverlayModel;
pub use pipeline::{CaptureProcessingPipeline, CapturedData, MeasurementService};
pub use validation::{FaceValidationEngine, LandmarkDetector, ValidationSnapshot};
pub use voice::{SpeechSynthesizer, VoiceGuidanceScheduler};
