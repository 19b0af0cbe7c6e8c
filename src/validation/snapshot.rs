use super::checks::{self, CheckId, ValidationCheck};
use super::landmarks::FaceLandmarks;
use serde::Serialize;

/// Raw values the checks of one frame were computed from
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FrameMetrics {
    /// Smoothed face width, percent of frame width
    pub face_width_percent: f64,
    pub left_eye_ratio: f64,
    pub right_eye_ratio: f64,
    pub head_tilt: f64,
    pub head_rotation: f64,
    pub brightness: f64,
}

/// Result of one validation cycle; replaced wholesale every cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSnapshot {
    pub frame_id: u64,
    pub face_detected: bool,
    pub landmarks: Option<FaceLandmarks>,
    pub checks: Vec<ValidationCheck>,
    pub all_checks_passed: bool,
    pub metrics: Option<FrameMetrics>,
}

impl ValidationSnapshot {
    pub fn new(
        frame_id: u64,
        landmarks: FaceLandmarks,
        metrics: FrameMetrics,
        checks: Vec<ValidationCheck>,
    ) -> Self {
        let all_checks_passed = !checks.is_empty() && checks.iter().all(|check| check.passed);
        Self {
            frame_id,
            face_detected: true,
            landmarks: Some(landmarks),
            checks,
            all_checks_passed,
            metrics: Some(metrics),
        }
    }

    /// Snapshot for a frame in which no face was found
    pub fn no_face(frame_id: u64) -> Self {
        Self {
            frame_id,
            face_detected: false,
            landmarks: None,
            checks: checks::no_face(),
            all_checks_passed: false,
            metrics: None,
        }
    }

    /// Placeholder before the first evaluation
    pub fn empty() -> Self {
        Self::no_face(0)
    }

    pub fn check(&self, id: CheckId) -> Option<&ValidationCheck> {
        self.checks.iter().find(|check| check.id == id)
    }

    /// Highest priority failing check
    pub fn first_failing(&self) -> Option<&ValidationCheck> {
        self.checks.iter().find(|check| !check.passed)
    }

    pub fn failing_ids(&self) -> Vec<CheckId> {
        self.checks
            .iter()
            .filter(|check| !check.passed)
            .map(|check| check.id)
            .collect()
    }
}
