use super::data::{ApiLandmarks, ImageData, MeasurementScale, Measurements};
use super::service::{GlassesDetection, GlassesRemoval, LandmarksResponse, MeasurementService};
use crate::capture::ProcessingStep;
use crate::error::PipelineError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::debug;

/// Measurement service with canned answers, used offline and in tests
pub struct FixedMeasurementService {
    glasses_detected: bool,
    edited_image: Option<ImageData>,
    landmarks: ApiLandmarks,
    rejected: Mutex<HashSet<ProcessingStep>>,
    broken: Mutex<HashSet<ProcessingStep>>,
    delay: Duration,
    detect_calls: AtomicUsize,
    remove_calls: AtomicUsize,
    landmark_calls: AtomicUsize,
}

impl Default for FixedMeasurementService {
    fn default() -> Self {
        Self::new()
    }
}

impl FixedMeasurementService {
    pub fn new() -> Self {
        Self {
            glasses_detected: false,
            edited_image: None,
            landmarks: sample_landmarks(),
            rejected: Mutex::new(HashSet::new()),
            broken: Mutex::new(HashSet::new()),
            delay: Duration::ZERO,
            detect_calls: AtomicUsize::new(0),
            remove_calls: AtomicUsize::new(0),
            landmark_calls: AtomicUsize::new(0),
        }
    }

    /// Report glasses and answer removal with `edited` (or no image)
    pub fn with_glasses(mut self, edited: Option<ImageData>) -> Self {
        self.glasses_detected = true;
        self.edited_image = edited;
        self
    }

    pub fn with_landmarks(mut self, landmarks: ApiLandmarks) -> Self {
        self.landmarks = landmarks;
        self
    }

    /// Every call takes this long
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Answer `success: false` at this stage
    pub fn rejecting(self, step: ProcessingStep) -> Self {
        self.rejected.lock().insert(step);
        self
    }

    /// Fail the call itself at this stage
    pub fn failing(self, step: ProcessingStep) -> Self {
        self.broken.lock().insert(step);
        self
    }

    pub fn calls(&self, step: ProcessingStep) -> usize {
        self.counter(step).load(Ordering::SeqCst)
    }

    fn counter(&self, step: ProcessingStep) -> &AtomicUsize {
        match step {
            ProcessingStep::DetectGlasses => &self.detect_calls,
            ProcessingStep::RemoveGlasses => &self.remove_calls,
            ProcessingStep::DetectLandmarks => &self.landmark_calls,
        }
    }

    /// Shared prologue of every call; returns whether the stage succeeds
    async fn enter(&self, step: ProcessingStep) -> Result<bool, PipelineError> {
        self.counter(step).fetch_add(1, Ordering::SeqCst);
        debug!("Fixed measurement service: {}", step);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if self.broken.lock().contains(&step) {
            return Err(PipelineError::stage(step, "service unavailable"));
        }
        Ok(!self.rejected.lock().contains(&step))
    }
}

#[async_trait]
impl MeasurementService for FixedMeasurementService {
    async fn detect_glasses(&self, _image: &ImageData) -> Result<GlassesDetection, PipelineError> {
        let success = self.enter(ProcessingStep::DetectGlasses).await?;
        Ok(GlassesDetection {
            success,
            glasses_detected: success && self.glasses_detected,
            confidence: Some(if self.glasses_detected { 0.94 } else { 0.08 }),
        })
    }

    async fn remove_glasses(&self, _image: &ImageData) -> Result<GlassesRemoval, PipelineError> {
        let success = self.enter(ProcessingStep::RemoveGlasses).await?;
        Ok(GlassesRemoval {
            success,
            edited_image: if success {
                self.edited_image.clone()
            } else {
                None
            },
        })
    }

    async fn detect_landmarks(
        &self,
        _image: &ImageData,
    ) -> Result<LandmarksResponse, PipelineError> {
        let success = self.enter(ProcessingStep::DetectLandmarks).await?;
        Ok(LandmarksResponse {
            success,
            landmarks: success.then(|| self.landmarks.clone()),
        })
    }
}

/// Plausible adult measurements
pub fn sample_landmarks() -> ApiLandmarks {
    ApiLandmarks {
        scale: Some(MeasurementScale {
            mm_per_pixel: 0.0854,
            iris_diameter_px: 137.0,
        }),
        mm: Some(Measurements {
            pd: 63.5,
            pd_left: 31.6,
            pd_right: 31.9,
            nose_bridge_left: 9.2,
            nose_bridge_right: 9.4,
            face_width: 141.0,
            face_height: 188.0,
            face_ratio: 1.33,
        }),
        face_shape: Some("oval".to_string()),
        debug: None,
    }
}
