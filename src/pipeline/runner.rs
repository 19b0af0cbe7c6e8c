use super::data::{CapturedData, ImageData};
use super::service::MeasurementService;
use crate::capture::ProcessingStep;
use crate::error::PipelineError;
use crate::frame::FrameData;
use crate::validation::FaceLandmarks;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// What the pipeline works on: the captured still and the landmarks frozen
/// when the countdown hit zero
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub image: ImageData,
    pub landmarks: FaceLandmarks,
}

impl PipelineInput {
    /// Encode the capture frame as a JPEG still
    pub async fn capture(
        frame: Option<FrameData>,
        landmarks: Option<FaceLandmarks>,
        mirror: bool,
        quality: u8,
    ) -> Result<Self, PipelineError> {
        let frame = frame.ok_or(PipelineError::NoFrame)?;
        let landmarks = landmarks.ok_or(PipelineError::NoLandmarks)?;

        let image = tokio::task::spawn_blocking(move || frame.encode_jpeg(mirror, quality))
            .await
            .map_err(|e| PipelineError::Capture {
                details: e.to_string(),
            })?
            .map_err(|e| PipelineError::Capture {
                details: e.to_string(),
            })?;

        debug!("Captured {} byte {} still", image.len(), image.mime());
        Ok(Self { image, landmarks })
    }
}

/// Intermediate results reported while the pipeline runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineProgress {
    GlassesChecked { glasses_detected: bool },
    GlassesRemoved,
}

/// Detect glasses, remove them when present, then measure.
///
/// Stages run strictly in sequence, each under its own timeout and racing
/// the cancellation token. A record is only built when every required stage
/// succeeded and the run was not cancelled.
pub struct CaptureProcessingPipeline {
    service: Arc<dyn MeasurementService>,
    stage_timeout: Duration,
}

impl CaptureProcessingPipeline {
    pub fn new(service: Arc<dyn MeasurementService>, stage_timeout: Duration) -> Self {
        Self {
            service,
            stage_timeout,
        }
    }

    pub async fn run<F>(
        &self,
        input: PipelineInput,
        cancel: &CancellationToken,
        mut progress: F,
    ) -> Result<CapturedData, PipelineError>
    where
        F: FnMut(PipelineProgress) + Send,
    {
        let PipelineInput { image, landmarks } = input;

        let detection = self
            .stage(
                ProcessingStep::DetectGlasses,
                cancel,
                self.service.detect_glasses(&image),
            )
            .await?;
        if !detection.success {
            return Err(PipelineError::Rejected {
                stage: ProcessingStep::DetectGlasses,
            });
        }
        info!(
            "Glasses detected: {} (confidence {:?})",
            detection.glasses_detected, detection.confidence
        );
        progress(PipelineProgress::GlassesChecked {
            glasses_detected: detection.glasses_detected,
        });

        let processed = if detection.glasses_detected {
            let removal = self
                .stage(
                    ProcessingStep::RemoveGlasses,
                    cancel,
                    self.service.remove_glasses(&image),
                )
                .await?;
            if !removal.success {
                return Err(PipelineError::Rejected {
                    stage: ProcessingStep::RemoveGlasses,
                });
            }
            progress(PipelineProgress::GlassesRemoved);
            match removal.edited_image {
                Some(edited) => edited,
                None => {
                    debug!("Glasses removal returned no image, measuring the original");
                    image.clone()
                }
            }
        } else {
            image.clone()
        };

        let response = self
            .stage(
                ProcessingStep::DetectLandmarks,
                cancel,
                self.service.detect_landmarks(&processed),
            )
            .await?;
        if !response.success {
            return Err(PipelineError::Rejected {
                stage: ProcessingStep::DetectLandmarks,
            });
        }
        let api_landmarks = response.landmarks.ok_or(PipelineError::MissingMeasurements)?;
        let measurements = api_landmarks
            .mm
            .clone()
            .ok_or(PipelineError::MissingMeasurements)?;

        // Teardown may have raced the last response
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        info!(
            "Measurements complete: PD {:.1} mm, face shape {:?}",
            measurements.pd, api_landmarks.face_shape
        );

        Ok(CapturedData::new(
            &image,
            &processed,
            detection.glasses_detected,
            landmarks,
            api_landmarks,
            measurements,
        ))
    }

    async fn stage<T, Fut>(
        &self,
        step: ProcessingStep,
        cancel: &CancellationToken,
        call: Fut,
    ) -> Result<T, PipelineError>
    where
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        debug!("{}", step.label());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = tokio::time::timeout(self.stage_timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Timeout {
                    stage: step,
                    after: self.stage_timeout,
                }),
            },
        }
    }
}
