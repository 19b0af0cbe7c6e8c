use super::{MediaDevice, MediaStream};
use crate::config::{CameraConfig, MAX_CAMERA_FPS};
use crate::error::CameraError;
use crate::frame::FrameData;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, info};

/// Camera that generates uniform frames, for demos and tests
pub struct SyntheticCamera {
    width: u32,
    height: u32,
    fps: u32,
    brightness: u8,
    present: bool,
    denials_left: AtomicU32,
    max_frames: Option<u64>,
}

impl SyntheticCamera {
    pub fn new(width: u32, height: u32, fps: u32, brightness: u8) -> Self {
        Self {
            width,
            height,
            fps: fps.clamp(1, MAX_CAMERA_FPS),
            brightness,
            present: true,
            denials_left: AtomicU32::new(0),
            max_frames: None,
        }
    }

    pub fn from_config(config: &CameraConfig) -> Self {
        Self::new(
            config.resolution.0,
            config.resolution.1,
            config.fps,
            config.synthetic_brightness,
        )
    }

    /// Deny the first `count` requests, then grant
    pub fn with_denials(self, count: u32) -> Self {
        self.denials_left.store(count, Ordering::SeqCst);
        self
    }

    /// Behave as if no camera were attached
    pub fn without_device(mut self) -> Self {
        self.present = false;
        self
    }

    /// End the stream after `count` frames
    pub fn with_frame_limit(mut self, count: u64) -> Self {
        self.max_frames = Some(count);
        self
    }
}

#[async_trait]
impl MediaDevice for SyntheticCamera {
    async fn request_access(&self) -> Result<Box<dyn MediaStream>, CameraError> {
        if !self.present {
            return Err(CameraError::NotFound {
                details: "synthetic camera configured without a device".to_string(),
            });
        }

        let denied = self
            .denials_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if denied {
            return Err(CameraError::PermissionDenied {
                details: "synthetic camera denied access".to_string(),
            });
        }

        info!(
            "Synthetic camera streaming {}x{} @ {}fps (level {})",
            self.width, self.height, self.fps, self.brightness
        );

        let mut ticker = interval(Duration::from_millis(1000 / self.fps as u64));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        Ok(Box::new(SyntheticStream {
            template: FrameData::solid(0, self.width, self.height, self.brightness),
            ticker,
            next_id: 1,
            max_frames: self.max_frames,
        }))
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

struct SyntheticStream {
    template: FrameData,
    ticker: Interval,
    next_id: u64,
    max_frames: Option<u64>,
}

#[async_trait]
impl MediaStream for SyntheticStream {
    async fn next_frame(&mut self) -> Option<FrameData> {
        if let Some(max) = self.max_frames {
            if self.next_id > max {
                return None;
            }
        }

        self.ticker.tick().await;
        let frame = self.template.with_id(self.next_id);
        self.next_id += 1;
        Some(frame)
    }

    async fn stop(&mut self) {
        debug!("Synthetic stream stopped after {} frames", self.next_id - 1);
    }
}
