use super::snapshot::FrameMetrics;
use crate::config::{DeviceProfile, ValidationConfig};
use serde::{Deserialize, Serialize};

/// Eye aspect ratio threshold used with the mobile profile
pub const MOBILE_EYE_ASPECT_RATIO_THRESHOLD: f64 = 0.005;

/// Validation checks; declaration order is guidance priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckId {
    Distance,
    LeftEyeOpen,
    RightEyeOpen,
    HeadTilt,
    HeadRotation,
    Brightness,
}

impl CheckId {
    pub const ALL: [CheckId; 6] = [
        CheckId::Distance,
        CheckId::LeftEyeOpen,
        CheckId::RightEyeOpen,
        CheckId::HeadTilt,
        CheckId::HeadRotation,
        CheckId::Brightness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckId::Distance => "distance",
            CheckId::LeftEyeOpen => "left-eye-open",
            CheckId::RightEyeOpen => "right-eye-open",
            CheckId::HeadTilt => "head-tilt",
            CheckId::HeadRotation => "head-rotation",
            CheckId::Brightness => "brightness",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CheckId::Distance => "Distance",
            CheckId::LeftEyeOpen => "Left eye open",
            CheckId::RightEyeOpen => "Right eye open",
            CheckId::HeadTilt => "Head straight",
            CheckId::HeadRotation => "Facing camera",
            CheckId::Brightness => "Lighting",
        }
    }
}

/// What the user has to change for a failing check to pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Correction {
    FindFace,
    MoveCloser,
    MoveBack,
    OpenEyes,
    TiltLeft,
    TiltRight,
    TurnLeft,
    TurnRight,
    AddLight,
    ReduceLight,
}

impl Correction {
    pub fn message(&self) -> &'static str {
        match self {
            Correction::FindFace => "No face detected",
            Correction::MoveCloser => "Move closer to camera",
            Correction::MoveBack => "Move back from camera",
            Correction::OpenEyes => "Keep eyes open",
            Correction::TiltLeft => "Tilt head left",
            Correction::TiltRight => "Tilt head right",
            Correction::TurnLeft => "Turn head left",
            Correction::TurnRight => "Turn head right",
            Correction::AddLight => "Too dark - add light",
            Correction::ReduceLight => "Too bright",
        }
    }
}

/// Outcome of one check for one frame
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationCheck {
    pub id: CheckId,
    pub label: &'static str,
    pub passed: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correction: Option<Correction>,
}

impl ValidationCheck {
    fn pass(id: CheckId, message: &str) -> Self {
        Self {
            id,
            label: id.label(),
            passed: true,
            message: message.to_string(),
            correction: None,
        }
    }

    fn fail(id: CheckId, correction: Correction) -> Self {
        Self {
            id,
            label: id.label(),
            passed: false,
            message: correction.message().to_string(),
            correction: Some(correction),
        }
    }

    fn from_outcome(id: CheckId, correction: Option<Correction>, ok_message: &str) -> Self {
        match correction {
            Some(correction) => Self::fail(id, correction),
            None => Self::pass(id, ok_message),
        }
    }
}

/// Limits the checks are evaluated against
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationThresholds {
    pub min_face_width_percent: f64,
    pub max_face_width_percent: f64,
    pub eye_aspect_ratio_threshold: f64,
    pub max_head_tilt: f64,
    pub max_head_rotation: f64,
    pub min_brightness: f64,
    pub max_brightness: f64,
}

impl ValidationThresholds {
    pub fn from_config(config: &ValidationConfig) -> Self {
        let eye_aspect_ratio_threshold = match config.profile {
            DeviceProfile::Desktop => config.eye_aspect_ratio_threshold,
            DeviceProfile::Mobile => MOBILE_EYE_ASPECT_RATIO_THRESHOLD,
        };

        Self {
            min_face_width_percent: config.min_face_width_percent,
            max_face_width_percent: config.max_face_width_percent,
            eye_aspect_ratio_threshold,
            max_head_tilt: config.max_head_tilt,
            max_head_rotation: config.max_head_rotation,
            min_brightness: config.min_brightness,
            max_brightness: config.max_brightness,
        }
    }
}

/// Evaluate every check, in priority order, against measured metrics
pub fn evaluate(metrics: &FrameMetrics, thresholds: &ValidationThresholds) -> Vec<ValidationCheck> {
    let distance = if metrics.face_width_percent < thresholds.min_face_width_percent {
        Some(Correction::MoveCloser)
    } else if metrics.face_width_percent > thresholds.max_face_width_percent {
        Some(Correction::MoveBack)
    } else {
        None
    };

    let eye = |ratio: f64| (ratio <= thresholds.eye_aspect_ratio_threshold).then_some(Correction::OpenEyes);

    let tilt = if metrics.head_tilt.abs() <= thresholds.max_head_tilt {
        None
    } else if metrics.head_tilt > 0.0 {
        Some(Correction::TiltLeft)
    } else {
        Some(Correction::TiltRight)
    };

    let rotation = if metrics.head_rotation.abs() <= thresholds.max_head_rotation {
        None
    } else if metrics.head_rotation > 0.0 {
        Some(Correction::TurnLeft)
    } else {
        Some(Correction::TurnRight)
    };

    let brightness = if metrics.brightness < thresholds.min_brightness {
        Some(Correction::AddLight)
    } else if metrics.brightness > thresholds.max_brightness {
        Some(Correction::ReduceLight)
    } else {
        None
    };

    vec![
        ValidationCheck::from_outcome(CheckId::Distance, distance, "Perfect distance"),
        ValidationCheck::from_outcome(CheckId::LeftEyeOpen, eye(metrics.left_eye_ratio), "Eye open"),
        ValidationCheck::from_outcome(CheckId::RightEyeOpen, eye(metrics.right_eye_ratio), "Eye open"),
        ValidationCheck::from_outcome(CheckId::HeadTilt, tilt, "Head straight"),
        ValidationCheck::from_outcome(CheckId::HeadRotation, rotation, "Facing camera"),
        ValidationCheck::from_outcome(CheckId::Brightness, brightness, "Good lighting"),
    ]
}

/// Every check failing because no face was found
pub fn no_face() -> Vec<ValidationCheck> {
    CheckId::ALL
        .iter()
        .map(|id| ValidationCheck::fail(*id, Correction::FindFace))
        .collect()
}
