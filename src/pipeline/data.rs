use crate::error::{FitcamError, Result};
use crate::validation::FaceLandmarks;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Encoded image travelling between pipeline stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    mime: String,
    bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime: mime.into(),
            bytes,
        }
    }

    /// Decode a bare base64 payload
    pub fn from_base64(mime: impl Into<String>, encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| FitcamError::Image {
                details: format!("Invalid base64 image: {}", e),
            })?;
        Ok(Self::new(mime, bytes))
    }

    /// Parse a `data:<mime>;base64,<payload>` URL
    pub fn from_data_url(url: &str) -> Result<Self> {
        let invalid = || FitcamError::Image {
            details: "Not a base64 data URL".to_string(),
        };

        let rest = url.strip_prefix("data:").ok_or_else(invalid)?;
        let (header, payload) = rest.split_once(',').ok_or_else(invalid)?;
        let mime = header.strip_suffix(";base64").ok_or_else(invalid)?;

        Self::from_base64(mime, payload)
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// File extension matching the mime type, for multipart uploads
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "image/png" => "png",
            "image/webp" => "webp",
            _ => "jpg",
        }
    }
}

/// Facial measurements in millimetres
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurements {
    pub pd: f64,
    pub pd_left: f64,
    pub pd_right: f64,
    pub nose_bridge_left: f64,
    pub nose_bridge_right: f64,
    pub face_width: f64,
    pub face_height: f64,
    pub face_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementScale {
    pub mm_per_pixel: f64,
    pub iris_diameter_px: f64,
}

/// Landmark payload returned by the measurement service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiLandmarks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<MeasurementScale>,
    #[serde(default)]
    pub mm: Option<Measurements>,
    #[serde(default)]
    pub face_shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<serde_json::Value>,
}

/// Finished capture handed to the downstream consumer.
///
/// Only the processing pipeline builds these, and only once every stage has
/// succeeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedData {
    image_data_url: String,
    processed_image_data_url: String,
    glasses_detected: bool,
    landmarks: FaceLandmarks,
    measurements: Measurements,
    face_shape: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_response: Option<ApiLandmarks>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
}

impl CapturedData {
    pub(crate) fn new(
        original: &ImageData,
        processed: &ImageData,
        glasses_detected: bool,
        landmarks: FaceLandmarks,
        api_response: ApiLandmarks,
        measurements: Measurements,
    ) -> Self {
        Self {
            image_data_url: original.to_data_url(),
            processed_image_data_url: processed.to_data_url(),
            glasses_detected,
            landmarks,
            measurements,
            face_shape: api_response.face_shape.clone(),
            api_response: Some(api_response),
            timestamp: Utc::now(),
        }
    }

    pub fn image_data_url(&self) -> &str {
        &self.image_data_url
    }

    pub fn processed_image_data_url(&self) -> &str {
        &self.processed_image_data_url
    }

    pub fn glasses_detected(&self) -> bool {
        self.glasses_detected
    }

    pub fn landmarks(&self) -> &FaceLandmarks {
        &self.landmarks
    }

    pub fn measurements(&self) -> &Measurements {
        &self.measurements
    }

    pub fn face_shape(&self) -> Option<&str> {
        self.face_shape.as_deref()
    }

    pub fn api_response(&self) -> Option<&ApiLandmarks> {
        self.api_response.as_ref()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}
