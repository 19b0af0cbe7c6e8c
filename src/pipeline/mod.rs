mod data;
#[cfg(feature = "http")]
mod http;
mod mock;
mod runner;
mod service;
#[cfg(test)]
mod tests;

pub use data::{ApiLandmarks, CapturedData, ImageData, MeasurementScale, Measurements};
#[cfg(feature = "http")]
pub use http::HttpMeasurementService;
pub use mock::{sample_landmarks, FixedMeasurementService};
pub use runner::{CaptureProcessingPipeline, PipelineInput, PipelineProgress};
pub use service::{GlassesDetection, GlassesRemoval, LandmarksResponse, MeasurementService};
