use super::speech::SpeechSynthesizer;
use crate::config::VoiceConfig;
use crate::validation::{CheckId, Correction, ValidationCheck, ValidationSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// An utterance handed to the speech synthesizer
#[derive(Debug, Clone, PartialEq)]
pub struct GuidancePhrase {
    pub text: String,
    pub priority_check: CheckId,
    pub emitted_at: Instant,
}

/// Turns failing checks into at most one utterance per debounce window
pub struct VoiceGuidanceScheduler {
    speech: Arc<dyn SpeechSynthesizer>,
    debounce: Duration,
    enabled: bool,
    last: Option<GuidancePhrase>,
}

impl VoiceGuidanceScheduler {
    pub fn new(speech: Arc<dyn SpeechSynthesizer>, config: &VoiceConfig) -> Self {
        Self {
            speech,
            debounce: Duration::from_millis(config.debounce_ms),
            enabled: config.enabled,
            last: None,
        }
    }

    /// Speak for the highest priority failing check if the window allows it
    pub fn guide(&mut self, snapshot: &ValidationSnapshot, now: Instant) -> Option<GuidancePhrase> {
        if !self.enabled || snapshot.all_checks_passed || !snapshot.face_detected {
            return None;
        }

        let check = snapshot.first_failing()?;
        let text = phrase_for(check)?;

        if let Some(last) = &self.last {
            let since = now.saturating_duration_since(last.emitted_at);
            if since < self.debounce {
                debug!(
                    "Guidance for {} suppressed ({:?} since last)",
                    check.id.as_str(),
                    since
                );
                return None;
            }
        }

        // Never overlap: anything still playing is cut off first
        self.speech.cancel();
        self.speech.speak(&text);
        info!("Guidance for {}: {}", check.id.as_str(), text);

        let phrase = GuidancePhrase {
            text,
            priority_check: check.id,
            emitted_at: now,
        };
        self.last = Some(phrase.clone());
        Some(phrase)
    }

    /// Cut off any utterance in flight
    pub fn silence(&mut self) {
        self.speech.cancel();
    }

    pub fn last_phrase(&self) -> Option<&GuidancePhrase> {
        self.last.as_ref()
    }
}

/// Spoken phrase for a failing check
pub fn phrase_for(check: &ValidationCheck) -> Option<String> {
    if check.passed {
        return None;
    }

    let text = match check.correction? {
        Correction::MoveCloser => "Please move closer to the camera",
        Correction::MoveBack => "Please move back from the camera",
        Correction::OpenEyes => "Please keep your eyes open",
        Correction::TiltLeft | Correction::TiltRight => {
            "Please keep your head straight, avoid tilting"
        }
        Correction::TurnLeft | Correction::TurnRight => "Please look straight at the camera",
        Correction::AddLight | Correction::ReduceLight => return Some(check.message.clone()),
        Correction::FindFace => return None,
    };

    Some(text.to_string())
}
