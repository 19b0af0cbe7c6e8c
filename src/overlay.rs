use crate::capture::CaptureState;
use crate::error::PROCESSING_FAILURE_MESSAGE;
use crate::validation::{CheckId, FrameMetrics, ValidationSnapshot};
use serde::Serialize;
use std::fmt;

/// One row of the on-screen checklist
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChecklistItem {
    pub id: CheckId,
    pub label: &'static str,
    pub passed: bool,
    pub message: String,
}

/// What the guide overlay shows for one state and snapshot.
///
/// Purely presentational: nothing here feeds back into the capture flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OverlayModel {
    pub state: CaptureState,
    pub is_valid: bool,
    pub face_detected: bool,
    pub headline: String,
    pub checklist: Vec<ChecklistItem>,
    pub countdown: Option<u8>,
    pub processing_label: Option<&'static str>,
    pub metrics: Option<FrameMetrics>,
}

impl OverlayModel {
    pub fn build(state: &CaptureState, snapshot: &ValidationSnapshot) -> Self {
        let face_detected = snapshot.face_detected;
        let is_valid = face_detected && snapshot.all_checks_passed;

        let countdown = state.countdown().filter(|remaining| *remaining > 0);
        let processing_label = state.processing_step().map(|step| step.label());

        let headline = match state {
            CaptureState::AwaitingPermission => "Waiting for camera access".to_string(),
            CaptureState::Countdown(n) if *n > 0 => "Hold still...".to_string(),
            CaptureState::Countdown(_) => "Capturing...".to_string(),
            CaptureState::Processing(step) => step.label().to_string(),
            CaptureState::Complete => "Capture complete".to_string(),
            CaptureState::Failed => PROCESSING_FAILURE_MESSAGE.to_string(),
            CaptureState::Live if !face_detected => "Position your face in the oval".to_string(),
            CaptureState::Live if is_valid => "Perfect! Capturing...".to_string(),
            CaptureState::Live => "Adjust your position".to_string(),
        };

        let checklist = snapshot
            .checks
            .iter()
            .map(|check| ChecklistItem {
                id: check.id,
                label: check.label,
                passed: check.passed,
                message: check.message.clone(),
            })
            .collect();

        Self {
            state: *state,
            is_valid,
            face_detected,
            headline,
            checklist,
            countdown,
            processing_label,
            metrics: snapshot.metrics,
        }
    }

    pub fn failing(&self) -> impl Iterator<Item = &ChecklistItem> {
        self.checklist.iter().filter(|item| !item.passed)
    }
}

impl fmt::Display for OverlayModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.state, self.headline)?;

        if let Some(remaining) = self.countdown {
            write!(f, " {}", remaining)?;
        }

        if self.face_detected && !self.is_valid {
            let failing: Vec<&str> = self.failing().map(|item| item.id.as_str()).collect();
            write!(f, " | failing: {}", failing.join(","))?;
        }

        if let Some(metrics) = &self.metrics {
            write!(
                f,
                " | width {:.1}% tilt {:.1} rot {:.1} bright {:.0}",
                metrics.face_width_percent,
                metrics.head_tilt,
                metrics.head_rotation,
                metrics.brightness
            )?;
        }

        Ok(())
    }
}
