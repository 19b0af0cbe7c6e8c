use parking_lot::Mutex;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Output channel for spoken guidance.
///
/// `speak` must return quickly; playback happens in the background and is
/// interrupted by `cancel`.
pub trait SpeechSynthesizer: Send + Sync {
    fn speak(&self, text: &str);

    fn cancel(&self);
}

/// Writes guidance to the log instead of a speaker
#[derive(Debug, Default)]
pub struct LogSpeech;

impl SpeechSynthesizer for LogSpeech {
    fn speak(&self, text: &str) {
        info!("Voice guidance: {}", text);
    }

    fn cancel(&self) {}
}

/// Speaks through an external program such as `espeak` or `say`
pub struct CommandSpeech {
    program: String,
    args: Vec<String>,
    current: Mutex<Option<Child>>,
}

impl CommandSpeech {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current: Mutex::new(None),
        }
    }

    fn stop_current(current: &mut Option<Child>) {
        if let Some(mut child) = current.take() {
            match child.try_wait() {
                Ok(Some(_)) => {}
                _ => {
                    if let Err(e) = child.start_kill() {
                        debug!("Failed to stop speech process: {}", e);
                    }
                }
            }
        }
    }
}

impl SpeechSynthesizer for CommandSpeech {
    fn speak(&self, text: &str) {
        let mut current = self.current.lock();
        Self::stop_current(&mut current);

        let spawned = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        match spawned {
            Ok(child) => {
                debug!("Speaking via {}: {}", self.program, text);
                *current = Some(child);
            }
            Err(e) => warn!("Failed to run speech program {}: {}", self.program, e),
        }
    }

    fn cancel(&self) {
        Self::stop_current(&mut self.current.lock());
    }
}

impl Drop for CommandSpeech {
    fn drop(&mut self) {
        Self::stop_current(self.current.get_mut());
    }
}
