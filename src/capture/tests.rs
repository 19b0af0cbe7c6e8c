use super::*;
use crate::camera::{CameraState, SyntheticCamera};
use crate::config::FitcamConfig;
use crate::error::{FitcamError, PROCESSING_FAILURE_MESSAGE};
use crate::events::{EventBus, FitcamEvent};
use crate::frame::FrameData;
use crate::pipeline::{
    CaptureProcessingPipeline, CapturedData, FixedMeasurementService, ImageData, PipelineInput,
};
use crate::validation::{FacePose, ScriptSegment, ScriptedDetector};
use crate::voice::LogSpeech;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

fn create_test_config() -> FitcamConfig {
    let mut config = FitcamConfig::default();
    config.camera.resolution = (64, 48);
    config.voice.enabled = false;
    config
}

fn good_pose() -> FacePose {
    FacePose {
        face_width_percent: 50.0,
        eye_openness: 0.02,
        tilt_degrees: 2.0,
        rotation_degrees: 3.0,
        ..FacePose::default()
    }
}

fn create_test_camera() -> SyntheticCamera {
    SyntheticCamera::new(64, 48, 30, 150)
}

struct TestSession {
    handle: SessionHandle,
    events: broadcast::Receiver<FitcamEvent>,
    records: mpsc::Receiver<CapturedData>,
}

fn start_session(
    config: FitcamConfig,
    camera: SyntheticCamera,
    detector: ScriptedDetector,
    service: Arc<FixedMeasurementService>,
) -> TestSession {
    let event_bus = EventBus::new(512);
    let events = event_bus.subscribe();
    let (record_tx, records) = mpsc::channel(4);

    let session = CaptureSession::builder(config)
        .camera(Arc::new(camera))
        .detector(Arc::new(detector))
        .speech(Arc::new(LogSpeech))
        .measurement_service(service)
        .sink(Arc::new(ChannelSink::new(record_tx)))
        .event_bus(event_bus)
        .build()
        .unwrap();

    TestSession {
        handle: session.spawn(),
        events,
        records,
    }
}

fn drain_states(events: &mut broadcast::Receiver<FitcamEvent>) -> Vec<CaptureState> {
    let mut states = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let FitcamEvent::CaptureStateChanged { to, .. } = event {
            states.push(to);
        }
    }
    states
}

fn feed(machine: &mut CaptureStateMachine, inputs: Vec<MachineInput>) -> Outcome {
    let mut last = Outcome::default();
    for input in inputs {
        last = machine.handle(input);
    }
    last
}

fn passing(all_checks_passed: bool) -> MachineInput {
    MachineInput::Validation { all_checks_passed }
}

#[test]
fn test_rising_edge_starts_countdown() {
    let mut machine = CaptureStateMachine::new(3);
    assert_eq!(machine.state(), CaptureState::AwaitingPermission);

    // Validation before the camera is granted is not an edge
    machine.handle(passing(true));
    assert_eq!(machine.state(), CaptureState::AwaitingPermission);

    machine.handle(MachineInput::CameraGranted);
    assert_eq!(machine.state(), CaptureState::Live);

    let outcome = machine.handle(passing(true));
    assert_eq!(machine.state(), CaptureState::Countdown(3));
    assert_eq!(
        outcome.transitions,
        vec![Transition {
            from: CaptureState::Live,
            to: CaptureState::Countdown(3)
        }]
    );
    assert!(outcome
        .actions
        .contains(&MachineAction::StartCountdown { from: 3 }));
    assert!(outcome.actions.contains(&MachineAction::SilenceGuidance));

    // A held level is not a new edge
    assert!(machine.handle(passing(true)).is_empty());
}

#[test]
fn test_failing_check_cancels_countdown() {
    let mut machine = CaptureStateMachine::new(3);
    feed(
        &mut machine,
        vec![MachineInput::CameraGranted, passing(true), MachineInput::CountdownTick],
    );
    assert_eq!(machine.state(), CaptureState::Countdown(2));

    let outcome = machine.handle(passing(false));
    assert_eq!(machine.state(), CaptureState::Live);
    assert_eq!(outcome.actions, vec![MachineAction::CancelCountdown]);

    // Passing again is a fresh edge and restarts from the top
    machine.handle(passing(true));
    assert_eq!(machine.state(), CaptureState::Countdown(3));
}

#[test]
fn test_countdown_reaching_zero_starts_pipeline() {
    let mut machine = CaptureStateMachine::new(3);
    let outcome = feed(
        &mut machine,
        vec![
            MachineInput::CameraGranted,
            passing(true),
            MachineInput::CountdownTick,
            MachineInput::CountdownTick,
            MachineInput::CountdownTick,
        ],
    );

    assert_eq!(
        machine.state(),
        CaptureState::Processing(ProcessingStep::DetectGlasses)
    );
    assert!(machine.is_capturing());
    let targets: Vec<CaptureState> = outcome.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        targets,
        vec![
            CaptureState::Countdown(0),
            CaptureState::Processing(ProcessingStep::DetectGlasses)
        ]
    );
    assert_eq!(
        outcome.actions,
        vec![MachineAction::CancelCountdown, MachineAction::StartPipeline]
    );

    // Validation is ignored while capturing
    machine.handle(passing(false));
    assert!(machine.is_capturing());
}

#[test]
fn test_glasses_path_through_processing() {
    let mut machine = CaptureStateMachine::new(1);
    feed(
        &mut machine,
        vec![
            MachineInput::CameraGranted,
            passing(true),
            MachineInput::CountdownTick,
            MachineInput::GlassesChecked {
                glasses_detected: true,
            },
        ],
    );
    assert_eq!(
        machine.state(),
        CaptureState::Processing(ProcessingStep::RemoveGlasses)
    );

    machine.handle(MachineInput::GlassesRemoved);
    assert_eq!(
        machine.state(),
        CaptureState::Processing(ProcessingStep::DetectLandmarks)
    );

    let outcome = machine.handle(MachineInput::PipelineSucceeded);
    assert_eq!(machine.state(), CaptureState::Complete);
    assert_eq!(outcome.actions, vec![MachineAction::ReleaseCamera]);

    // Complete is terminal
    assert!(machine.handle(MachineInput::CameraGranted).is_empty());
    assert_eq!(machine.state(), CaptureState::Complete);
}

#[test]
fn test_pipeline_failure_returns_to_live() {
    let mut machine = CaptureStateMachine::new(1);
    feed(
        &mut machine,
        vec![
            MachineInput::CameraGranted,
            passing(true),
            MachineInput::CountdownTick,
            MachineInput::GlassesChecked {
                glasses_detected: false,
            },
        ],
    );

    let outcome = machine.handle(MachineInput::PipelineFailed {
        reason: "Landmark detection was rejected by the service".to_string(),
    });

    assert_eq!(machine.state(), CaptureState::Live);
    let targets: Vec<CaptureState> = outcome.transitions.iter().map(|t| t.to).collect();
    assert_eq!(targets, vec![CaptureState::Failed, CaptureState::Live]);
    assert_eq!(
        outcome.actions,
        vec![MachineAction::NotifyFailure {
            message: PROCESSING_FAILURE_MESSAGE.to_string(),
            reason: "Landmark detection was rejected by the service".to_string(),
        }]
    );

    // Checks still passing since before the failure: no new countdown
    assert!(machine.handle(passing(true)).is_empty());
    machine.handle(passing(false));
    machine.handle(passing(true));
    assert_eq!(machine.state(), CaptureState::Countdown(1));
}

#[test]
fn test_camera_loss_during_countdown() {
    let mut machine = CaptureStateMachine::new(3);
    feed(&mut machine, vec![MachineInput::CameraGranted, passing(true)]);

    let outcome = machine.handle(MachineInput::CameraUnavailable {
        reason: "gone".to_string(),
    });

    assert_eq!(machine.state(), CaptureState::AwaitingPermission);
    assert_eq!(
        outcome.actions,
        vec![
            MachineAction::CancelCountdown,
            MachineAction::SilenceGuidance,
            MachineAction::OfferCameraRetry {
                reason: "gone".to_string()
            },
        ]
    );

    // Regrant resets the edge even though the face never left
    machine.handle(MachineInput::CameraGranted);
    machine.handle(passing(true));
    assert_eq!(machine.state(), CaptureState::Countdown(3));
}

#[test]
fn test_denied_camera_offers_retry() {
    let mut machine = CaptureStateMachine::new(3);
    let outcome = machine.handle(MachineInput::CameraUnavailable {
        reason: "denied".to_string(),
    });

    assert!(outcome.transitions.is_empty());
    assert_eq!(
        outcome.actions,
        vec![MachineAction::OfferCameraRetry {
            reason: "denied".to_string()
        }]
    );
    assert_eq!(machine.state(), CaptureState::AwaitingPermission);
}

#[test]
fn test_stray_inputs_are_ignored() {
    let mut machine = CaptureStateMachine::new(3);
    assert!(machine.handle(MachineInput::CountdownTick).is_empty());
    assert!(machine.handle(MachineInput::PipelineSucceeded).is_empty());

    machine.handle(MachineInput::CameraGranted);
    assert!(machine.handle(MachineInput::GlassesRemoved).is_empty());
    assert!(machine.handle(MachineInput::CountdownTick).is_empty());
    assert_eq!(machine.state(), CaptureState::Live);
}

#[test]
fn test_state_labels() {
    assert_eq!(CaptureState::Countdown(0).to_string(), "countdown(0)");
    assert_eq!(
        CaptureState::Processing(ProcessingStep::DetectGlasses).to_string(),
        "processing(detect_glasses)"
    );
    assert_eq!(ProcessingStep::RemoveGlasses.label(), "Removing glasses...");
    assert!(CaptureState::Countdown(2).samples_validation());
    assert!(!CaptureState::Complete.samples_validation());
    assert_eq!(CaptureState::Countdown(2).countdown(), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_countdown_timer_ticks_once_per_interval() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut timer = CountdownTimer::new(Duration::from_secs(1), tx);
    let start = Instant::now();

    timer.start(3);
    assert!(timer.is_running());

    for _ in 0..3 {
        let tick = rx.recv().await.unwrap();
        assert!(timer.accepts(&tick));
    }
    assert_eq!(start.elapsed(), Duration::from_secs(3));

    sleep(Duration::from_secs(5)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_restarted_countdown_rejects_old_ticks() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut timer = CountdownTimer::new(Duration::from_millis(100), tx);

    timer.start(3);
    let first = rx.recv().await.unwrap();
    timer.start(3);

    assert!(!timer.accepts(&first));
    let next = rx.recv().await.unwrap();
    assert!(timer.accepts(&next));

    timer.cancel();
    assert!(!timer.is_running());
    assert!(!timer.accepts(&next));
    sleep(Duration::from_secs(1)).await;
    assert!(rx.try_recv().is_err());
}

async fn sample_record() -> CapturedData {
    let service = Arc::new(FixedMeasurementService::new());
    let input = PipelineInput::capture(
        Some(FrameData::solid(1, 32, 24, 128)),
        Some(crate::validation::FaceLandmarks::from_pose(&good_pose())),
        true,
        90,
    )
    .await
    .unwrap();

    CaptureProcessingPipeline::new(service, Duration::from_secs(5))
        .run(input, &CancellationToken::new(), |_| {})
        .await
        .unwrap()
}

#[tokio::test]
async fn test_json_file_sink_writes_record() {
    let temp_dir = tempfile::tempdir().unwrap();
    let sink = JsonFileSink::new(temp_dir.path().join("captures"));
    let data = sample_record().await;

    let path = sink.write(&data).await.unwrap();
    assert!(path.starts_with(temp_dir.path()));
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("json"));

    let text = tokio::fs::read_to_string(&path).await.unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert!(json["imageDataUrl"]
        .as_str()
        .unwrap()
        .starts_with("data:image/jpeg;base64,"));
    assert_eq!(json["measurements"]["pd"], 63.5);
}

#[tokio::test]
async fn test_channel_sink_delivers_and_reports_drop() {
    let (tx, mut rx) = mpsc::channel(1);
    let sink = ChannelSink::new(tx);
    let data = sample_record().await;

    sink.deliver(&data).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().measurements(), data.measurements());

    drop(rx);
    assert!(sink.deliver(&data).await.is_err());
}

#[test]
fn test_builder_requires_collaborators() {
    let result = CaptureSession::builder(create_test_config())
        .camera(Arc::new(create_test_camera()))
        .build();
    assert!(result.is_err());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let mut config = create_test_config();
    config.validation.sample_interval_ms = 0;

    let result = CaptureSession::builder(config)
        .camera(Arc::new(create_test_camera()))
        .detector(Arc::new(ScriptedDetector::fixed(None)))
        .measurement_service(Arc::new(FixedMeasurementService::new()))
        .build();
    assert!(matches!(result, Err(FitcamError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn test_session_captures_after_countdown() {
    let service = Arc::new(FixedMeasurementService::new());
    let mut session = start_session(
        create_test_config(),
        create_test_camera(),
        ScriptedDetector::fixed(Some(good_pose())),
        service.clone(),
    );
    let start = Instant::now();

    let outcome = timeout(Duration::from_secs(30), session.handle.join())
        .await
        .unwrap()
        .unwrap();

    let data = match outcome {
        SessionOutcome::Completed(data) => data,
        other => panic!("Expected a completed capture, got {:?}", other),
    };
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert!(!data.glasses_detected());
    assert_eq!(data.measurements().pd, 63.5);
    assert_eq!(service.calls(ProcessingStep::DetectGlasses), 1);

    let delivered = session.records.recv().await.unwrap();
    assert_eq!(delivered.measurements(), data.measurements());

    let states = drain_states(&mut session.events);
    assert_eq!(
        states,
        vec![
            CaptureState::Live,
            CaptureState::Countdown(3),
            CaptureState::Countdown(2),
            CaptureState::Countdown(1),
            CaptureState::Countdown(0),
            CaptureState::Processing(ProcessingStep::DetectGlasses),
            CaptureState::Processing(ProcessingStep::DetectLandmarks),
            CaptureState::Complete,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_session_removes_glasses_before_measuring() {
    let edited = ImageData::new("image/png", vec![0x89, b'P', b'N', b'G']);
    let service = Arc::new(FixedMeasurementService::new().with_glasses(Some(edited.clone())));
    let mut session = start_session(
        create_test_config(),
        create_test_camera(),
        ScriptedDetector::fixed(Some(good_pose())),
        service.clone(),
    );

    let outcome = timeout(Duration::from_secs(30), session.handle.join())
        .await
        .unwrap()
        .unwrap();

    let SessionOutcome::Completed(data) = outcome else {
        panic!("Expected a completed capture");
    };
    assert!(data.glasses_detected());
    assert_eq!(data.processed_image_data_url(), edited.to_data_url());
    assert_ne!(data.image_data_url(), data.processed_image_data_url());
    assert_eq!(service.calls(ProcessingStep::RemoveGlasses), 1);

    let states = drain_states(&mut session.events);
    assert!(states.contains(&CaptureState::Processing(ProcessingStep::RemoveGlasses)));
}

#[tokio::test(start_paused = true)]
async fn test_session_failure_returns_to_live_without_record() {
    let service = Arc::new(
        FixedMeasurementService::new().rejecting(ProcessingStep::DetectLandmarks),
    );
    let mut session = start_session(
        create_test_config(),
        create_test_camera(),
        ScriptedDetector::fixed(Some(good_pose())),
        service.clone(),
    );

    let message = timeout(Duration::from_secs(30), async {
        loop {
            if let Ok(FitcamEvent::CaptureFailed { message, .. }) = session.events.recv().await {
                return message;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(message, PROCESSING_FAILURE_MESSAGE);

    sleep(Duration::from_secs(5)).await;
    assert_eq!(session.handle.state(), CaptureState::Live);
    assert!(session.records.try_recv().is_err());
    // Checks never stopped passing, so no second attempt
    assert_eq!(service.calls(ProcessingStep::DetectGlasses), 1);

    session.handle.shutdown();
    let outcome = session.handle.join().await.unwrap();
    assert!(matches!(outcome, SessionOutcome::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_blink_during_countdown_aborts_capture() {
    let blink = FacePose {
        eye_openness: 0.0,
        ..good_pose()
    };
    let detector = ScriptedDetector::new(vec![
        ScriptSegment {
            hold_ms: 2500,
            pose: Some(good_pose()),
        },
        ScriptSegment {
            hold_ms: 1000,
            pose: Some(blink),
        },
    ])
    .unwrap();
    let service = Arc::new(FixedMeasurementService::new());
    let mut session = start_session(
        create_test_config(),
        create_test_camera(),
        detector,
        service.clone(),
    );

    sleep(Duration::from_secs(6)).await;

    assert_eq!(session.handle.state(), CaptureState::Live);
    assert_eq!(service.calls(ProcessingStep::DetectGlasses), 0);

    let states = drain_states(&mut session.events);
    assert!(states.contains(&CaptureState::Countdown(2)));
    assert!(!states.contains(&CaptureState::Countdown(0)));
    assert_eq!(states.last(), Some(&CaptureState::Live));

    session.handle.shutdown();
    assert!(matches!(
        session.handle.join().await.unwrap(),
        SessionOutcome::Cancelled
    ));
}

#[tokio::test(start_paused = true)]
async fn test_denied_camera_retried_on_request() {
    let mut session = start_session(
        create_test_config(),
        create_test_camera().with_denials(1),
        ScriptedDetector::fixed(None),
        Arc::new(FixedMeasurementService::new()),
    );

    let mut camera = session.handle.camera_state();
    timeout(
        Duration::from_secs(1),
        camera.wait_for(|state| matches!(state, CameraState::Denied { .. })),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(session.handle.state(), CaptureState::AwaitingPermission);

    // Nothing retries on its own with the default interval
    sleep(Duration::from_secs(2)).await;
    assert_eq!(session.handle.state(), CaptureState::AwaitingPermission);

    assert!(session.handle.retry_camera());
    let mut state = session.handle.subscribe_state();
    timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s == CaptureState::Live),
    )
    .await
    .unwrap()
    .unwrap();

    session.handle.shutdown();
    session.handle.join().await.unwrap();
    assert_eq!(*camera.borrow(), CameraState::Idle);
    assert!(drain_states(&mut session.events).contains(&CaptureState::Live));
}

#[tokio::test(start_paused = true)]
async fn test_denied_camera_retried_on_interval() {
    let mut config = create_test_config();
    config.camera.retry_interval_ms = 500;
    let session = start_session(
        config,
        create_test_camera().with_denials(2),
        ScriptedDetector::fixed(None),
        Arc::new(FixedMeasurementService::new()),
    );
    let start = Instant::now();

    let mut state = session.handle.subscribe_state();
    timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == CaptureState::Live),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(start.elapsed() >= Duration::from_secs(1));

    session.handle.shutdown();
    session.handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_camera_loss_returns_to_permission() {
    let mut session = start_session(
        create_test_config(),
        create_test_camera().with_frame_limit(5),
        ScriptedDetector::fixed(None),
        Arc::new(FixedMeasurementService::new()),
    );

    sleep(Duration::from_secs(2)).await;

    assert_eq!(session.handle.state(), CaptureState::AwaitingPermission);
    assert_eq!(*session.handle.camera_state().borrow(), CameraState::Idle);
    assert_eq!(
        drain_states(&mut session.events),
        vec![CaptureState::Live, CaptureState::AwaitingPermission]
    );

    session.handle.shutdown();
    session.handle.join().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_mid_pipeline_discards_record() {
    let service =
        Arc::new(FixedMeasurementService::new().with_delay(Duration::from_secs(10)));
    let mut session = start_session(
        create_test_config(),
        create_test_camera(),
        ScriptedDetector::fixed(Some(good_pose())),
        service.clone(),
    );

    let mut state = session.handle.subscribe_state();
    timeout(
        Duration::from_secs(10),
        state.wait_for(|s| s.processing_step().is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    session.handle.shutdown();
    let outcome = session.handle.join().await.unwrap();

    assert!(matches!(outcome, SessionOutcome::Cancelled));
    sleep(Duration::from_secs(15)).await;
    assert!(session.records.try_recv().is_err());
    assert_eq!(service.calls(ProcessingStep::DetectLandmarks), 0);
}

#[tokio::test(start_paused = true)]
async fn test_camera_lost_while_processing_offers_retry_after_failure() {
    // The stream ends about five seconds in, while the slow pipeline is running
    let service = Arc::new(
        FixedMeasurementService::new()
            .with_delay(Duration::from_secs(5))
            .rejecting(ProcessingStep::DetectLandmarks),
    );
    let mut session = start_session(
        create_test_config(),
        create_test_camera().with_frame_limit(150),
        ScriptedDetector::fixed(Some(good_pose())),
        service.clone(),
    );

    let mut state = session.handle.subscribe_state();
    timeout(
        Duration::from_secs(10),
        state.wait_for(|s| s.processing_step().is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    timeout(
        Duration::from_secs(30),
        state.wait_for(|s| *s == CaptureState::AwaitingPermission),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(*session.handle.camera_state().borrow(), CameraState::Idle);
    assert_eq!(service.calls(ProcessingStep::DetectLandmarks), 1);
    let states = drain_states(&mut session.events);
    assert!(states.ends_with(&[
        CaptureState::Failed,
        CaptureState::Live,
        CaptureState::AwaitingPermission
    ]));

    assert!(session.handle.retry_camera());
    timeout(
        Duration::from_secs(1),
        state.wait_for(|s| *s != CaptureState::AwaitingPermission),
    )
    .await
    .unwrap()
    .unwrap();

    session.handle.shutdown();
    session.handle.join().await.unwrap();
    assert!(session.records.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_while_sink_is_full_discards_record() {
    let (record_tx, mut records) = mpsc::channel(1);
    let occupied = record_tx.clone().reserve_owned().await.unwrap();
    let service = Arc::new(FixedMeasurementService::new());

    let handle = CaptureSession::builder(create_test_config())
        .camera(Arc::new(create_test_camera()))
        .detector(Arc::new(ScriptedDetector::fixed(Some(good_pose()))))
        .speech(Arc::new(LogSpeech))
        .measurement_service(service.clone())
        .sink(Arc::new(ChannelSink::new(record_tx)))
        .build()
        .unwrap()
        .spawn();

    let mut state = handle.subscribe_state();
    timeout(
        Duration::from_secs(10),
        state.wait_for(|s| s.processing_step().is_some()),
    )
    .await
    .unwrap()
    .unwrap();

    // The pipeline finishes at once; delivery then waits on the full channel
    sleep(Duration::from_secs(1)).await;
    assert_eq!(service.calls(ProcessingStep::DetectLandmarks), 1);
    assert_eq!(
        handle.state(),
        CaptureState::Processing(ProcessingStep::DetectLandmarks)
    );

    handle.shutdown();
    let outcome = timeout(Duration::from_secs(5), handle.join())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(outcome, SessionOutcome::Cancelled));

    drop(occupied);
    assert!(records.try_recv().is_err());
}
