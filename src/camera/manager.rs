use super::{MediaDevice, MediaStream};
use crate::error::CameraError;
use crate::frame::FrameData;
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Camera access as seen by the rest of the flow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CameraState {
    /// Nothing requested yet, or released
    Idle,
    Requesting,
    Granted,
    Denied { reason: String },
    Error { reason: String },
}

impl CameraState {
    pub fn is_granted(&self) -> bool {
        matches!(self, CameraState::Granted)
    }
}

impl fmt::Display for CameraState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraState::Idle => f.write_str("idle"),
            CameraState::Requesting => f.write_str("requesting"),
            CameraState::Granted => f.write_str("granted"),
            CameraState::Denied { reason } => write!(f, "denied ({})", reason),
            CameraState::Error { reason } => write!(f, "error ({})", reason),
        }
    }
}

/// Read-only view of the most recent camera frame
#[derive(Clone)]
pub struct FrameSource {
    receiver: watch::Receiver<Option<FrameData>>,
}

impl FrameSource {
    /// Latest frame, if the camera has produced one
    pub fn latest(&self) -> Option<FrameData> {
        self.receiver.borrow().clone()
    }

    /// Wait until a frame newer than the last seen one arrives
    pub async fn changed(&mut self) -> bool {
        self.receiver.changed().await.is_ok()
    }
}

struct Pump {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Sole owner of the camera stream.
///
/// The stream itself lives inside a pump task that publishes every frame into
/// a single "latest frame" slot; everybody else reads through [`FrameSource`].
pub struct CameraAccessManager {
    device: Arc<dyn MediaDevice>,
    state: Arc<watch::Sender<CameraState>>,
    frames: Arc<watch::Sender<Option<FrameData>>>,
    pump: Mutex<Option<Pump>>,
}

impl CameraAccessManager {
    pub fn new(device: Arc<dyn MediaDevice>) -> Self {
        let (state, _) = watch::channel(CameraState::Idle);
        let (frames, _) = watch::channel(None);

        Self {
            device,
            state: Arc::new(state),
            frames: Arc::new(frames),
            pump: Mutex::new(None),
        }
    }

    /// Ask the device for access and start pumping frames on success
    pub async fn request_access(&self) -> Result<FrameSource, CameraError> {
        if self.is_streaming() {
            debug!("Camera {} already streaming", self.device.name());
            return Ok(self.frame_source());
        }

        info!("Requesting access to camera {}", self.device.name());
        self.state.send_replace(CameraState::Requesting);

        match self.device.request_access().await {
            Ok(stream) => {
                let cancel = CancellationToken::new();
                let task = tokio::spawn(pump_frames(
                    stream,
                    Arc::clone(&self.frames),
                    Arc::clone(&self.state),
                    cancel.clone(),
                ));

                // A concurrent request may have won; keep one pump only
                if let Some(previous) = self.pump.lock().replace(Pump { cancel, task }) {
                    previous.cancel.cancel();
                }

                self.state.send_replace(CameraState::Granted);
                info!("Camera {} access granted", self.device.name());
                Ok(self.frame_source())
            }
            Err(e) => {
                let reason = e.user_message().to_string();
                warn!("Camera {} unavailable: {}", self.device.name(), e);
                let state = match e {
                    CameraError::PermissionDenied { .. } => CameraState::Denied { reason },
                    _ => CameraState::Error { reason },
                };
                self.state.send_replace(state);
                Err(e)
            }
        }
    }

    /// Stop the stream; safe to call any number of times
    pub fn release(&self) -> bool {
        let Some(pump) = self.pump.lock().take() else {
            return false;
        };

        pump.cancel.cancel();
        // The pump stops the stream on its way out; never wait on it here
        drop(pump.task);

        self.frames.send_replace(None);
        self.state.send_replace(CameraState::Idle);
        info!("Camera {} released", self.device.name());
        true
    }

    /// Handle for consumers that only need frames
    pub fn frame_source(&self) -> FrameSource {
        FrameSource {
            receiver: self.frames.subscribe(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> CameraState {
        self.state.borrow().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.pump
            .lock()
            .as_ref()
            .map(|pump| !pump.task.is_finished())
            .unwrap_or(false)
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }
}

impl Drop for CameraAccessManager {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.cancel.cancel();
        }
    }
}

async fn pump_frames(
    mut stream: Box<dyn MediaStream>,
    frames: Arc<watch::Sender<Option<FrameData>>>,
    state: Arc<watch::Sender<CameraState>>,
    cancel: CancellationToken,
) {
    debug!("Camera pump started");

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Camera pump cancelled");
                break;
            }
            frame = stream.next_frame() => match frame {
                Some(frame) => {
                    trace!("Camera frame {} ({}x{})", frame.id, frame.width, frame.height);
                    frames.send_replace(Some(frame));
                }
                None => {
                    warn!("Camera stream ended");
                    state.send_replace(CameraState::Error {
                        reason: CameraError::StreamEnded.user_message().to_string(),
                    });
                    break;
                }
            }
        }
    }

    stream.stop().await;
    debug!("Camera pump stopped");
}
