mod checks;
mod detector;
mod engine;
mod landmarks;
mod snapshot;

pub use checks::{
    evaluate, CheckId, Correction, ValidationCheck, ValidationThresholds,
    MOBILE_EYE_ASPECT_RATIO_THRESHOLD,
};
pub use detector::{LandmarkDetector, ScriptSegment, ScriptedDetector};
pub use engine::FaceValidationEngine;
pub use landmarks::{FaceLandmarks, FacePose, Point};
pub use snapshot::{FrameMetrics, ValidationSnapshot};
