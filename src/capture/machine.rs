use super::state::{CaptureState, ProcessingStep};
use crate::error::PROCESSING_FAILURE_MESSAGE;
use tracing::{debug, info};

/// Something that happened which the capture flow has to react to
#[derive(Debug, Clone, PartialEq)]
pub enum MachineInput {
    CameraGranted,
    CameraUnavailable { reason: String },
    Validation { all_checks_passed: bool },
    CountdownTick,
    GlassesChecked { glasses_detected: bool },
    GlassesRemoved,
    PipelineSucceeded,
    PipelineFailed { reason: String },
}

/// Side effect the driver must carry out after a transition
#[derive(Debug, Clone, PartialEq)]
pub enum MachineAction {
    StartCountdown { from: u8 },
    CancelCountdown,
    SilenceGuidance,
    StartPipeline,
    NotifyFailure { message: String, reason: String },
    OfferCameraRetry { reason: String },
    ReleaseCamera,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: CaptureState,
    pub to: CaptureState,
}

/// Transitions taken and actions requested by one input
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub transitions: Vec<Transition>,
    pub actions: Vec<MachineAction>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty() && self.actions.is_empty()
    }
}

/// Pure transition function of the guided capture flow.
///
/// The countdown is edge triggered: it starts only when `all_checks_passed`
/// goes from false to true, whatever state the previous level was seen in.
#[derive(Debug)]
pub struct CaptureStateMachine {
    state: CaptureState,
    countdown_start: u8,
    last_all_passed: bool,
}

impl CaptureStateMachine {
    pub fn new(countdown_start: u8) -> Self {
        Self {
            state: CaptureState::AwaitingPermission,
            countdown_start: countdown_start.max(1),
            last_all_passed: false,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn is_capturing(&self) -> bool {
        self.state.is_capturing()
    }

    pub fn handle(&mut self, input: MachineInput) -> Outcome {
        let mut outcome = Outcome::default();

        match (self.state, input) {
            (CaptureState::AwaitingPermission, MachineInput::CameraGranted) => {
                // A fresh stream starts a fresh edge
                self.last_all_passed = false;
                self.enter(CaptureState::Live, &mut outcome);
            }
            (CaptureState::AwaitingPermission, MachineInput::CameraUnavailable { reason }) => {
                outcome
                    .actions
                    .push(MachineAction::OfferCameraRetry { reason });
            }
            (CaptureState::Live, MachineInput::CameraUnavailable { reason }) => {
                outcome.actions.push(MachineAction::SilenceGuidance);
                self.enter(CaptureState::AwaitingPermission, &mut outcome);
                outcome
                    .actions
                    .push(MachineAction::OfferCameraRetry { reason });
            }
            (CaptureState::Countdown(_), MachineInput::CameraUnavailable { reason }) => {
                outcome.actions.push(MachineAction::CancelCountdown);
                outcome.actions.push(MachineAction::SilenceGuidance);
                self.enter(CaptureState::AwaitingPermission, &mut outcome);
                outcome
                    .actions
                    .push(MachineAction::OfferCameraRetry { reason });
            }
            (CaptureState::Live, MachineInput::Validation { all_checks_passed }) => {
                let rising = all_checks_passed && !self.last_all_passed;
                self.last_all_passed = all_checks_passed;
                if rising {
                    self.enter(CaptureState::Countdown(self.countdown_start), &mut outcome);
                    outcome.actions.push(MachineAction::SilenceGuidance);
                    outcome.actions.push(MachineAction::StartCountdown {
                        from: self.countdown_start,
                    });
                }
            }
            (CaptureState::Countdown(_), MachineInput::Validation { all_checks_passed }) => {
                self.last_all_passed = all_checks_passed;
                if !all_checks_passed {
                    outcome.actions.push(MachineAction::CancelCountdown);
                    self.enter(CaptureState::Live, &mut outcome);
                }
            }
            (CaptureState::Countdown(n), MachineInput::CountdownTick) if n > 0 => {
                let remaining = n - 1;
                self.enter(CaptureState::Countdown(remaining), &mut outcome);
                if remaining == 0 {
                    outcome.actions.push(MachineAction::CancelCountdown);
                    self.enter(
                        CaptureState::Processing(ProcessingStep::DetectGlasses),
                        &mut outcome,
                    );
                    outcome.actions.push(MachineAction::StartPipeline);
                }
            }
            (
                CaptureState::Processing(ProcessingStep::DetectGlasses),
                MachineInput::GlassesChecked { glasses_detected },
            ) => {
                let next = if glasses_detected {
                    ProcessingStep::RemoveGlasses
                } else {
                    ProcessingStep::DetectLandmarks
                };
                self.enter(CaptureState::Processing(next), &mut outcome);
            }
            (
                CaptureState::Processing(ProcessingStep::RemoveGlasses),
                MachineInput::GlassesRemoved,
            ) => {
                self.enter(
                    CaptureState::Processing(ProcessingStep::DetectLandmarks),
                    &mut outcome,
                );
            }
            (
                CaptureState::Processing(ProcessingStep::DetectLandmarks),
                MachineInput::PipelineSucceeded,
            ) => {
                self.enter(CaptureState::Complete, &mut outcome);
                outcome.actions.push(MachineAction::ReleaseCamera);
            }
            (CaptureState::Processing(_), MachineInput::PipelineFailed { reason }) => {
                self.enter(CaptureState::Failed, &mut outcome);
                outcome.actions.push(MachineAction::NotifyFailure {
                    message: PROCESSING_FAILURE_MESSAGE.to_string(),
                    reason,
                });
                self.enter(CaptureState::Live, &mut outcome);
            }
            (_, MachineInput::Validation { all_checks_passed }) => {
                // Level is tracked everywhere so a later Live sees the true edge
                self.last_all_passed = all_checks_passed;
            }
            (state, input) => {
                debug!("Ignoring {:?} in state {}", input, state);
            }
        }

        outcome
    }

    fn enter(&mut self, to: CaptureState, outcome: &mut Outcome) {
        let from = self.state;
        self.state = to;
        info!("Capture state {} -> {}", from, to);
        outcome.transitions.push(Transition { from, to });
    }
}
