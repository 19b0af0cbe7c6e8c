use super::data::{ApiLandmarks, ImageData};
use crate::error::PipelineError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlassesDetection {
    pub success: bool,
    #[serde(default)]
    pub glasses_detected: bool,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlassesRemoval {
    pub success: bool,
    /// Image with the glasses removed; absent when the service kept the input
    pub edited_image: Option<ImageData>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LandmarksResponse {
    pub success: bool,
    #[serde(default)]
    pub landmarks: Option<ApiLandmarks>,
}

/// The external measurement services, one call per pipeline stage
#[async_trait]
pub trait MeasurementService: Send + Sync {
    async fn detect_glasses(&self, image: &ImageData) -> Result<GlassesDetection, PipelineError>;

    async fn remove_glasses(&self, image: &ImageData) -> Result<GlassesRemoval, PipelineError>;

    async fn detect_landmarks(&self, image: &ImageData)
        -> Result<LandmarksResponse, PipelineError>;
}
