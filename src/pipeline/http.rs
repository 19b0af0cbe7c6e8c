use super::data::ImageData;
use super::service::{GlassesDetection, GlassesRemoval, LandmarksResponse, MeasurementService};
use crate::capture::ProcessingStep;
use crate::config::PipelineConfig;
use crate::error::{FitcamError, PipelineError, Result};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info};

/// Measurement service reached over HTTP with multipart uploads
pub struct HttpMeasurementService {
    client: Client,
    base_url: String,
    guest_id: String,
    session_id: String,
}

#[derive(Deserialize)]
struct RemovalJson {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    edited_image_base64: Option<String>,
}

fn default_success() -> bool {
    true
}

impl HttpMeasurementService {
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.stage_timeout())
            .build()
            .map_err(|e| FitcamError::component("pipeline", e.to_string()))?;

        let guest_id = config
            .guest_id
            .clone()
            .unwrap_or_else(|| format!("guest_{}", uuid::Uuid::new_v4().simple()));
        let session_id = config
            .session_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        info!(
            "Measurement service at {} (guest {}, session {})",
            config.base_url, guest_id, session_id
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            guest_id,
            session_id,
        })
    }

    async fn post_image(
        &self,
        step: ProcessingStep,
        path: &str,
        field: &'static str,
        image: &ImageData,
    ) -> std::result::Result<Response, PipelineError> {
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(format!("capture.{}", image.extension()))
            .mime_str(image.mime())
            .map_err(|e| PipelineError::stage(step, e.to_string()))?;
        let form = Form::new().part(field, part);

        let url = format!("{}{}", self.base_url, path);
        debug!("POST {} ({} bytes)", url, image.len());

        self.client
            .post(&url)
            .query(&[
                ("guest_id", self.guest_id.as_str()),
                ("session_id", self.session_id.as_str()),
            ])
            .multipart(form)
            .send()
            .await
            .and_then(Response::error_for_status)
            .map_err(|e| PipelineError::stage(step, e.to_string()))
    }
}

#[async_trait]
impl MeasurementService for HttpMeasurementService {
    async fn detect_glasses(
        &self,
        image: &ImageData,
    ) -> std::result::Result<GlassesDetection, PipelineError> {
        let step = ProcessingStep::DetectGlasses;
        self.post_image(step, "/glasses/detect", "file", image)
            .await?
            .json::<GlassesDetection>()
            .await
            .map_err(|e| PipelineError::stage(step, e.to_string()))
    }

    async fn remove_glasses(
        &self,
        image: &ImageData,
    ) -> std::result::Result<GlassesRemoval, PipelineError> {
        let step = ProcessingStep::RemoveGlasses;
        let response = self.post_image(step, "/glasses/remove", "image", image).await?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .to_string();

        // The service answers with either the edited image itself or JSON
        if content_type.starts_with("image/") {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| PipelineError::stage(step, e.to_string()))?;
            return Ok(GlassesRemoval {
                success: true,
                edited_image: Some(ImageData::new(content_type, bytes.to_vec())),
            });
        }

        let body: RemovalJson = response
            .json()
            .await
            .map_err(|e| PipelineError::stage(step, e.to_string()))?;
        let edited_image = body
            .edited_image_base64
            .map(|encoded| ImageData::from_base64("image/png", &encoded))
            .transpose()
            .map_err(|e| PipelineError::stage(step, e.to_string()))?;

        Ok(GlassesRemoval {
            success: body.success,
            edited_image,
        })
    }

    async fn detect_landmarks(
        &self,
        image: &ImageData,
    ) -> std::result::Result<LandmarksResponse, PipelineError> {
        let step = ProcessingStep::DetectLandmarks;
        self.post_image(step, "/landmarks/detect", "file", image)
            .await?
            .json::<LandmarksResponse>()
            .await
            .map_err(|e| PipelineError::stage(step, e.to_string()))
    }
}
