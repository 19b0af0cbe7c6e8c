use super::checks::{self, ValidationThresholds};
use super::detector::LandmarkDetector;
use super::snapshot::{FrameMetrics, ValidationSnapshot};
use crate::camera::FrameSource;
use crate::capture::CaptureState;
use crate::config::ValidationConfig;
use crate::frame::FrameData;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Longest a single landmark detection may take before the frame is skipped
const DETECTION_TIMEOUT: Duration = Duration::from_secs(2);

/// Turns camera frames into validation snapshots
pub struct FaceValidationEngine {
    detector: Arc<dyn LandmarkDetector>,
    thresholds: ValidationThresholds,
    smoothing: f64,
    sample_interval: Duration,
    smoothed_width: Option<f64>,
}

impl FaceValidationEngine {
    pub fn new(detector: Arc<dyn LandmarkDetector>, config: &ValidationConfig) -> Self {
        Self {
            detector,
            thresholds: ValidationThresholds::from_config(config),
            smoothing: config.face_width_smoothing,
            sample_interval: Duration::from_millis(config.sample_interval_ms),
            smoothed_width: None,
        }
    }

    pub fn thresholds(&self) -> &ValidationThresholds {
        &self.thresholds
    }

    /// Evaluate one frame; detector failures count as "no face"
    pub async fn evaluate(&mut self, frame: &FrameData) -> ValidationSnapshot {
        let landmarks = match tokio::time::timeout(DETECTION_TIMEOUT, self.detector.detect(frame))
            .await
        {
            Ok(Ok(landmarks)) => landmarks,
            Ok(Err(e)) => {
                warn!("Landmark detection failed on frame {}: {}", frame.id, e);
                None
            }
            Err(_) => {
                warn!("Landmark detection timeout, skipping frame {}", frame.id);
                None
            }
        };

        let Some(landmarks) = landmarks else {
            self.smoothed_width = None;
            return ValidationSnapshot::no_face(frame.id);
        };

        let brightness = frame.mean_brightness().unwrap_or_else(|e| {
            warn!("Brightness sampling failed on frame {}: {}", frame.id, e);
            0.0
        });

        let metrics = FrameMetrics {
            face_width_percent: self.smooth_width(landmarks.face_width_percent()),
            left_eye_ratio: landmarks.left_eye_ratio(),
            right_eye_ratio: landmarks.right_eye_ratio(),
            head_tilt: landmarks.head_tilt_degrees(),
            head_rotation: landmarks.head_rotation_degrees(),
            brightness,
        };
        let checks = checks::evaluate(&metrics, &self.thresholds);

        ValidationSnapshot::new(frame.id, landmarks, metrics, checks)
    }

    /// Forget smoothing history
    pub fn reset(&mut self) {
        self.smoothed_width = None;
    }

    fn smooth_width(&mut self, raw: f64) -> f64 {
        let smoothed = match self.smoothed_width {
            Some(previous) => previous * (1.0 - self.smoothing) + raw * self.smoothing,
            None => raw,
        };
        self.smoothed_width = Some(smoothed);
        smoothed
    }

    /// Run the sampling loop until `cancel` fires.
    ///
    /// At most one frame is evaluated per tick, and only while `state`
    /// samples validation. A snapshot whose evaluation outlived the sampling
    /// state is dropped.
    pub fn spawn(
        mut self,
        frames: FrameSource,
        state: watch::Receiver<CaptureState>,
        snapshots: watch::Sender<Arc<ValidationSnapshot>>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                "Face validation loop started ({:?} per sample)",
                self.sample_interval
            );

            let mut ticker = interval(self.sample_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last_frame_id: Option<u64> = None;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !state.borrow().samples_validation() {
                    continue;
                }

                let Some(frame) = frames.latest() else {
                    trace!("No frame available for validation");
                    continue;
                };

                match last_frame_id {
                    Some(last) if frame.id == last => {
                        trace!("Frame {} already evaluated, skipping", frame.id);
                        continue;
                    }
                    Some(last) if frame.id < last => {
                        debug!(
                            "Detected frame ID reset ({} -> {}), resetting smoothing",
                            last, frame.id
                        );
                        self.reset();
                    }
                    _ => {}
                }
                last_frame_id = Some(frame.id);

                let snapshot = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    snapshot = self.evaluate(&frame) => snapshot,
                };

                if !state.borrow().samples_validation() {
                    debug!(
                        "Discarding snapshot for frame {}, capture state is {}",
                        frame.id,
                        *state.borrow()
                    );
                    continue;
                }

                trace!(
                    "Frame {} evaluated: face={} passed={}",
                    snapshot.frame_id,
                    snapshot.face_detected,
                    snapshot.all_checks_passed
                );
                snapshots.send_replace(Arc::new(snapshot));
            }

            info!("Face validation loop stopped");
        })
    }
}
