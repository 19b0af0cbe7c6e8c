mod scheduler;
mod speech;

pub use scheduler::{phrase_for, GuidancePhrase, VoiceGuidanceScheduler};
pub use speech::{CommandSpeech, LogSpeech, SpeechSynthesizer};

use crate::config::VoiceConfig;
use std::sync::Arc;

/// Speech backend selected by configuration
pub fn speech_from_config(config: &VoiceConfig) -> Arc<dyn SpeechSynthesizer> {
    match &config.command {
        Some(program) => Arc::new(CommandSpeech::new(program.clone(), config.command_args.clone())),
        None => Arc::new(LogSpeech),
    }
}
