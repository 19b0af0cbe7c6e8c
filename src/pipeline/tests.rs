use super::*;
use crate::capture::ProcessingStep;
use crate::error::PipelineError;
use crate::frame::FrameData;
use crate::validation::{FaceLandmarks, FacePose};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn create_test_input() -> PipelineInput {
    PipelineInput {
        image: ImageData::new("image/jpeg", vec![0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]),
        landmarks: FaceLandmarks::from_pose(&FacePose::default()),
    }
}

fn pipeline_with(service: Arc<FixedMeasurementService>) -> CaptureProcessingPipeline {
    CaptureProcessingPipeline::new(service, Duration::from_secs(30))
}

#[tokio::test]
async fn test_no_glasses_skips_removal() {
    let service = Arc::new(FixedMeasurementService::new());
    let pipeline = pipeline_with(service.clone());
    let mut progress = Vec::new();

    let data = pipeline
        .run(create_test_input(), &CancellationToken::new(), |p| {
            progress.push(p)
        })
        .await
        .unwrap();

    assert!(!data.glasses_detected());
    assert_eq!(data.image_data_url(), data.processed_image_data_url());
    assert_eq!(data.measurements().pd, 63.5);
    assert_eq!(data.face_shape(), Some("oval"));
    assert_eq!(service.calls(ProcessingStep::DetectGlasses), 1);
    assert_eq!(service.calls(ProcessingStep::RemoveGlasses), 0);
    assert_eq!(service.calls(ProcessingStep::DetectLandmarks), 1);
    assert_eq!(
        progress,
        vec![PipelineProgress::GlassesChecked {
            glasses_detected: false
        }]
    );
}

#[tokio::test]
async fn test_glasses_removed_image_feeds_measurement() {
    let edited = ImageData::new("image/png", vec![0x89, b'P', b'N', b'G']);
    let service = Arc::new(FixedMeasurementService::new().with_glasses(Some(edited.clone())));
    let pipeline = pipeline_with(service.clone());
    let mut progress = Vec::new();

    let data = pipeline
        .run(create_test_input(), &CancellationToken::new(), |p| {
            progress.push(p)
        })
        .await
        .unwrap();

    assert!(data.glasses_detected());
    assert_ne!(data.image_data_url(), data.processed_image_data_url());
    assert_eq!(data.processed_image_data_url(), edited.to_data_url());
    assert!(data.image_data_url().starts_with("data:image/jpeg;base64,"));
    assert_eq!(service.calls(ProcessingStep::RemoveGlasses), 1);
    assert_eq!(
        progress,
        vec![
            PipelineProgress::GlassesChecked {
                glasses_detected: true
            },
            PipelineProgress::GlassesRemoved,
        ]
    );
}

#[tokio::test]
async fn test_removal_without_image_keeps_original() {
    let service = Arc::new(FixedMeasurementService::new().with_glasses(None));

    let data = pipeline_with(service)
        .run(create_test_input(), &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    assert!(data.glasses_detected());
    assert_eq!(data.image_data_url(), data.processed_image_data_url());
}

#[tokio::test]
async fn test_rejected_landmarks_yield_no_record() {
    let service = Arc::new(
        FixedMeasurementService::new().rejecting(ProcessingStep::DetectLandmarks),
    );

    let result = pipeline_with(service.clone())
        .run(create_test_input(), &CancellationToken::new(), |_| {})
        .await;

    match result {
        Err(PipelineError::Rejected { stage }) => {
            assert_eq!(stage, ProcessingStep::DetectLandmarks)
        }
        other => panic!("Expected rejection, got {:?}", other),
    }
    assert_eq!(service.calls(ProcessingStep::DetectLandmarks), 1);
}

#[tokio::test]
async fn test_failed_detection_stops_pipeline() {
    let service = Arc::new(FixedMeasurementService::new().failing(ProcessingStep::DetectGlasses));

    let result = pipeline_with(service.clone())
        .run(create_test_input(), &CancellationToken::new(), |_| {})
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Stage {
            stage: ProcessingStep::DetectGlasses,
            ..
        })
    ));
    assert_eq!(service.calls(ProcessingStep::DetectLandmarks), 0);
}

#[tokio::test]
async fn test_rejected_removal_stops_pipeline() {
    let service = Arc::new(
        FixedMeasurementService::new()
            .with_glasses(None)
            .rejecting(ProcessingStep::RemoveGlasses),
    );

    let result = pipeline_with(service.clone())
        .run(create_test_input(), &CancellationToken::new(), |_| {})
        .await;

    assert!(matches!(
        result,
        Err(PipelineError::Rejected {
            stage: ProcessingStep::RemoveGlasses
        })
    ));
    assert_eq!(service.calls(ProcessingStep::DetectLandmarks), 0);
}

#[tokio::test]
async fn test_missing_measurements_is_failure() {
    let service = Arc::new(FixedMeasurementService::new().with_landmarks(ApiLandmarks {
        face_shape: Some("round".to_string()),
        ..ApiLandmarks::default()
    }));

    let result = pipeline_with(service)
        .run(create_test_input(), &CancellationToken::new(), |_| {})
        .await;

    assert!(matches!(result, Err(PipelineError::MissingMeasurements)));
}

#[tokio::test(start_paused = true)]
async fn test_stage_timeout() {
    let service = Arc::new(FixedMeasurementService::new().with_delay(Duration::from_secs(60)));
    let pipeline = CaptureProcessingPipeline::new(service, Duration::from_secs(5));

    let err = pipeline
        .run(create_test_input(), &CancellationToken::new(), |_| {})
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert!(matches!(
        err,
        PipelineError::Timeout {
            stage: ProcessingStep::DetectGlasses,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_discards_in_flight_result() {
    let service = Arc::new(FixedMeasurementService::new().with_delay(Duration::from_secs(2)));
    let pipeline = pipeline_with(service.clone());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        trigger.cancel();
    });

    let result = pipeline
        .run(create_test_input(), &cancel, |_| {})
        .await;

    assert!(matches!(result, Err(PipelineError::Cancelled)));
    // Cancelled while measuring; the record was never built
    assert_eq!(service.calls(ProcessingStep::DetectLandmarks), 1);
}

#[tokio::test]
async fn test_capture_input_requires_frame_and_landmarks() {
    let landmarks = FaceLandmarks::from_pose(&FacePose::default());

    let err = PipelineInput::capture(None, Some(landmarks.clone()), true, 90)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoFrame));

    let frame = FrameData::solid(1, 32, 24, 128);
    let err = PipelineInput::capture(Some(frame.clone()), None, true, 90)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoLandmarks));

    let input = PipelineInput::capture(Some(frame), Some(landmarks), true, 90)
        .await
        .unwrap();
    assert_eq!(input.image.mime(), "image/jpeg");
    assert!(!input.image.is_empty());
}

#[test]
fn test_data_url_parsing() {
    let image = ImageData::new("image/png", vec![1, 2, 3, 4, 5]);
    let url = image.to_data_url();

    assert_eq!(url, "data:image/png;base64,AQIDBAU=");
    assert_eq!(ImageData::from_data_url(&url).unwrap(), image);
    assert!(ImageData::from_data_url("image/png;base64,AQID").is_err());
    assert!(ImageData::from_data_url("data:image/png,AQID").is_err());
    assert!(ImageData::from_data_url("data:image/png;base64,@@@").is_err());
}

#[tokio::test]
async fn test_captured_data_serializes_camel_case() {
    let service = Arc::new(FixedMeasurementService::new());
    let data = pipeline_with(service)
        .run(create_test_input(), &CancellationToken::new(), |_| {})
        .await
        .unwrap();

    let json = serde_json::to_value(&data).unwrap();
    assert!(json.get("imageDataUrl").is_some());
    assert!(json.get("processedImageDataUrl").is_some());
    assert_eq!(json["glassesDetected"], false);
    assert_eq!(json["faceShape"], "oval");
    assert_eq!(json["measurements"]["pd_left"], 31.6);
    assert!(json["landmarks"].get("leftEye").is_some());
    assert!(json["timestamp"].is_i64());

    let back: CapturedData = serde_json::from_value(json).unwrap();
    assert_eq!(back.measurements(), data.measurements());
}
