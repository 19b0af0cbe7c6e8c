mod manager;
mod synthetic;
#[cfg(all(feature = "camera", target_os = "linux"))]
mod v4l2;

pub use manager::{CameraAccessManager, CameraState, FrameSource};
pub use synthetic::SyntheticCamera;
#[cfg(all(feature = "camera", target_os = "linux"))]
pub use v4l2::V4l2Camera;

use crate::config::{CameraBackend, CameraConfig};
use crate::error::{CameraError, Result};
use crate::frame::FrameData;
use async_trait::async_trait;
use std::sync::Arc;

/// A capture device that can be asked for access
#[async_trait]
pub trait MediaDevice: Send + Sync {
    /// Request access; resolves with an open stream or the reason access failed
    async fn request_access(&self) -> std::result::Result<Box<dyn MediaStream>, CameraError>;

    fn name(&self) -> &str;
}

/// An open stream of frames, owned by exactly one pump task
#[async_trait]
pub trait MediaStream: Send {
    /// Next frame, or `None` once the stream has ended
    async fn next_frame(&mut self) -> Option<FrameData>;

    /// Stop the underlying device
    async fn stop(&mut self);
}

/// Build the configured camera backend
pub fn device_from_config(config: &CameraConfig) -> Result<Arc<dyn MediaDevice>> {
    match config.backend {
        CameraBackend::Synthetic => Ok(Arc::new(SyntheticCamera::from_config(config))),
        #[cfg(all(feature = "camera", target_os = "linux"))]
        CameraBackend::V4l2 => Ok(Arc::new(V4l2Camera::new(config.clone()))),
        #[cfg(not(all(feature = "camera", target_os = "linux")))]
        CameraBackend::V4l2 => Err(crate::error::FitcamError::component(
            "camera",
            "V4L2 backend requires the `camera` feature on Linux",
        )),
    }
}
