use super::countdown::{CountdownTick, CountdownTimer};
use super::machine::{CaptureStateMachine, MachineAction, MachineInput};
use super::sink::{CaptureSink, LogSink};
use super::state::CaptureState;
use crate::camera::{CameraAccessManager, CameraState, FrameSource, MediaDevice};
use crate::config::FitcamConfig;
use crate::error::{FitcamError, PipelineError, Result};
use crate::events::{EventBus, FitcamEvent};
use crate::pipeline::{
    CaptureProcessingPipeline, CapturedData, MeasurementService, PipelineInput, PipelineProgress,
};
use crate::validation::{CheckId, FaceValidationEngine, LandmarkDetector, ValidationSnapshot};
use crate::voice::{speech_from_config, SpeechSynthesizer, VoiceGuidanceScheduler};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// How a capture session ended
#[derive(Debug)]
pub enum SessionOutcome {
    Completed(CapturedData),
    Cancelled,
}

/// Requests from the embedding application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    RetryCamera,
}

enum PipelineMessage {
    Progress {
        attempt: u64,
        progress: PipelineProgress,
    },
    Finished {
        attempt: u64,
        result: std::result::Result<CapturedData, PipelineError>,
    },
}

#[derive(Debug, Clone)]
struct SessionSettings {
    countdown_start: u8,
    countdown_tick: Duration,
    retry_interval: Option<Duration>,
    mirror_capture: bool,
    jpeg_quality: u8,
}

impl SessionSettings {
    fn from_config(config: &FitcamConfig) -> Self {
        Self {
            countdown_start: config.countdown.start,
            countdown_tick: config.countdown.tick(),
            retry_interval: (config.camera.retry_interval_ms > 0)
                .then(|| Duration::from_millis(config.camera.retry_interval_ms)),
            mirror_capture: config.pipeline.mirror_capture,
            jpeg_quality: config.pipeline.jpeg_quality,
        }
    }
}

/// One guided capture flow, from camera permission to a finished record
pub struct CaptureSession {
    settings: SessionSettings,
    camera: CameraAccessManager,
    engine: FaceValidationEngine,
    voice: VoiceGuidanceScheduler,
    pipeline: Arc<CaptureProcessingPipeline>,
    sink: Arc<dyn CaptureSink>,
    event_bus: EventBus,
}

impl CaptureSession {
    pub fn builder(config: FitcamConfig) -> CaptureSessionBuilder {
        CaptureSessionBuilder::new(config)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Start the flow on its own task
    pub fn spawn(self) -> SessionHandle {
        let (state_tx, state_rx) = watch::channel(CaptureState::AwaitingPermission);
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(ValidationSnapshot::empty()));
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let (pipeline_tx, pipeline_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let camera_rx = self.camera.subscribe();

        let CaptureSession {
            settings,
            camera,
            engine,
            voice,
            pipeline,
            sink,
            event_bus,
        } = self;

        let frames = camera.frame_source();
        let engine_cancel = cancel.child_token();
        let engine_task = engine.spawn(
            frames.clone(),
            state_rx.clone(),
            snapshot_tx,
            engine_cancel.clone(),
        );

        let driver = SessionDriver {
            machine: CaptureStateMachine::new(settings.countdown_start),
            timer: CountdownTimer::new(settings.countdown_tick, tick_tx),
            settings,
            camera,
            frames,
            voice,
            pipeline,
            sink,
            event_bus,
            state_tx,
            cancel: cancel.clone(),
            current: Arc::new(ValidationSnapshot::empty()),
            last_validation: None,
            attempt: 0,
            pipeline_cancel: None,
            pipeline_tx,
            retry_at: None,
            camera_lost: None,
            completed: None,
        };

        let receivers = SessionReceivers {
            commands: command_rx,
            ticks: tick_rx,
            pipeline: pipeline_rx,
            snapshots: snapshot_rx.clone(),
            camera: camera_rx.clone(),
        };

        let task = tokio::spawn(driver.run(receivers, engine_cancel, engine_task));

        SessionHandle {
            state: state_rx,
            snapshots: snapshot_rx,
            camera: camera_rx,
            commands: command_tx,
            cancel,
            task,
        }
    }
}

/// Builder for [`CaptureSession`]
pub struct CaptureSessionBuilder {
    config: FitcamConfig,
    camera: Option<Arc<dyn MediaDevice>>,
    detector: Option<Arc<dyn LandmarkDetector>>,
    speech: Option<Arc<dyn SpeechSynthesizer>>,
    service: Option<Arc<dyn MeasurementService>>,
    sink: Option<Arc<dyn CaptureSink>>,
    event_bus: Option<EventBus>,
}

impl CaptureSessionBuilder {
    pub fn new(config: FitcamConfig) -> Self {
        Self {
            config,
            camera: None,
            detector: None,
            speech: None,
            service: None,
            sink: None,
            event_bus: None,
        }
    }

    pub fn camera(mut self, camera: Arc<dyn MediaDevice>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn detector(mut self, detector: Arc<dyn LandmarkDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn speech(mut self, speech: Arc<dyn SpeechSynthesizer>) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn measurement_service(mut self, service: Arc<dyn MeasurementService>) -> Self {
        self.service = Some(service);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn CaptureSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<CaptureSession> {
        self.config.validate()?;

        let camera = self.camera.ok_or_else(|| {
            FitcamError::component("capture_session", "Camera device is required")
        })?;
        let detector = self.detector.ok_or_else(|| {
            FitcamError::component("capture_session", "Landmark detector is required")
        })?;
        let service = self.service.ok_or_else(|| {
            FitcamError::component("capture_session", "Measurement service is required")
        })?;

        let config = self.config;
        let speech = self
            .speech
            .unwrap_or_else(|| speech_from_config(&config.voice));
        let sink = self.sink.unwrap_or_else(|| Arc::new(LogSink));
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(config.system.event_bus_capacity));

        Ok(CaptureSession {
            settings: SessionSettings::from_config(&config),
            camera: CameraAccessManager::new(camera),
            engine: FaceValidationEngine::new(detector, &config.validation),
            voice: VoiceGuidanceScheduler::new(speech, &config.voice),
            pipeline: Arc::new(CaptureProcessingPipeline::new(
                service,
                config.pipeline.stage_timeout(),
            )),
            sink,
            event_bus,
        })
    }
}

/// Control surface of a running [`CaptureSession`]
pub struct SessionHandle {
    state: watch::Receiver<CaptureState>,
    snapshots: watch::Receiver<Arc<ValidationSnapshot>>,
    camera: watch::Receiver<CameraState>,
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: CancellationToken,
    task: JoinHandle<Result<SessionOutcome>>,
}

impl SessionHandle {
    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CaptureState> {
        self.state.clone()
    }

    /// Latest validation snapshot
    pub fn snapshots(&self) -> watch::Receiver<Arc<ValidationSnapshot>> {
        self.snapshots.clone()
    }

    pub fn camera_state(&self) -> watch::Receiver<CameraState> {
        self.camera.clone()
    }

    /// Ask for camera access again after a denial
    pub fn retry_camera(&self) -> bool {
        self.commands.send(SessionCommand::RetryCamera).is_ok()
    }

    /// Tear the session down; any record still in flight is discarded
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub async fn join(self) -> Result<SessionOutcome> {
        self.task
            .await
            .map_err(|e| FitcamError::system(format!("Capture session task failed: {}", e)))?
    }
}

struct SessionReceivers {
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    ticks: mpsc::UnboundedReceiver<CountdownTick>,
    pipeline: mpsc::UnboundedReceiver<PipelineMessage>,
    snapshots: watch::Receiver<Arc<ValidationSnapshot>>,
    camera: watch::Receiver<CameraState>,
}

struct SessionDriver {
    settings: SessionSettings,
    machine: CaptureStateMachine,
    timer: CountdownTimer,
    camera: CameraAccessManager,
    frames: FrameSource,
    voice: VoiceGuidanceScheduler,
    pipeline: Arc<CaptureProcessingPipeline>,
    sink: Arc<dyn CaptureSink>,
    event_bus: EventBus,
    state_tx: watch::Sender<CaptureState>,
    cancel: CancellationToken,
    current: Arc<ValidationSnapshot>,
    last_validation: Option<(bool, bool, Vec<CheckId>)>,
    attempt: u64,
    pipeline_cancel: Option<CancellationToken>,
    pipeline_tx: mpsc::UnboundedSender<PipelineMessage>,
    retry_at: Option<Instant>,
    camera_lost: Option<String>,
    completed: Option<CapturedData>,
}

impl SessionDriver {
    async fn run(
        mut self,
        mut rx: SessionReceivers,
        engine_cancel: CancellationToken,
        engine_task: JoinHandle<()>,
    ) -> Result<SessionOutcome> {
        info!("Capture session started");
        self.request_camera().await;

        let outcome = loop {
            if let Some(data) = self.completed.take() {
                break SessionOutcome::Completed(data);
            }

            let retry_at = self.retry_at;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break SessionOutcome::Cancelled,
                Some(command) = rx.commands.recv() => self.handle_command(command).await,
                Some(message) = rx.pipeline.recv() => self.handle_pipeline(message).await,
                Some(tick) = rx.ticks.recv() => self.handle_tick(tick).await,
                Ok(()) = rx.camera.changed() => {
                    let state = rx.camera.borrow_and_update().clone();
                    self.handle_camera_state(state).await;
                }
                Ok(()) = rx.snapshots.changed() => {
                    let snapshot = Arc::clone(&rx.snapshots.borrow_and_update());
                    self.handle_snapshot(snapshot).await;
                }
                _ = wait_until(retry_at) => {
                    self.retry_at = None;
                    info!("Retrying camera access");
                    self.request_camera().await;
                }
            }
        };

        self.teardown(engine_cancel, engine_task).await;

        match &outcome {
            SessionOutcome::Completed(_) => info!("Capture session completed"),
            SessionOutcome::Cancelled => info!("Capture session cancelled"),
        }
        Ok(outcome)
    }

    async fn request_camera(&mut self) {
        if self.machine.state() != CaptureState::AwaitingPermission {
            debug!("Camera already granted, ignoring request");
            return;
        }

        match self.camera.request_access().await {
            Ok(_) => self.apply(MachineInput::CameraGranted).await,
            Err(e) => {
                self.apply(MachineInput::CameraUnavailable {
                    reason: e.user_message().to_string(),
                })
                .await
            }
        }
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::RetryCamera => {
                self.retry_at = None;
                self.request_camera().await;
            }
        }
    }

    async fn handle_camera_state(&mut self, state: CameraState) {
        self.publish(FitcamEvent::CameraStateChanged {
            state: state.clone(),
            timestamp: SystemTime::now(),
        })
        .await;

        if let CameraState::Error { reason } = state {
            let current = self.machine.state();
            if current.samples_validation() {
                warn!("Camera lost during preview: {}", reason);
                self.camera.release();
                self.apply(MachineInput::CameraUnavailable { reason }).await;
            } else if current.processing_step().is_some() {
                // The frame is already frozen; act on the loss once the attempt ends
                warn!("Camera lost while processing: {}", reason);
                self.camera.release();
                self.camera_lost = Some(reason);
            }
        }
    }

    async fn handle_snapshot(&mut self, snapshot: Arc<ValidationSnapshot>) {
        self.current = Arc::clone(&snapshot);

        let key = (
            snapshot.face_detected,
            snapshot.all_checks_passed,
            snapshot.failing_ids(),
        );
        if self.last_validation.as_ref() != Some(&key) {
            let (face_detected, all_checks_passed, failing) = key.clone();
            self.last_validation = Some(key);
            self.publish(FitcamEvent::ValidationUpdated {
                frame_id: snapshot.frame_id,
                face_detected,
                all_checks_passed,
                failing,
            })
            .await;
        }

        if self.machine.state() == CaptureState::Live {
            if let Some(phrase) = self.voice.guide(&snapshot, Instant::now()) {
                self.publish(FitcamEvent::GuidanceSpoken {
                    text: phrase.text,
                    check: phrase.priority_check,
                })
                .await;
            }
        }

        self.apply(MachineInput::Validation {
            all_checks_passed: snapshot.all_checks_passed,
        })
        .await;
    }

    async fn handle_tick(&mut self, tick: CountdownTick) {
        if self.timer.accepts(&tick) {
            self.apply(MachineInput::CountdownTick).await;
        } else {
            trace!("Dropping stale countdown tick {:?}", tick);
        }
    }

    async fn handle_pipeline(&mut self, message: PipelineMessage) {
        match message {
            PipelineMessage::Progress { attempt, progress } if attempt == self.attempt => {
                let input = match progress {
                    PipelineProgress::GlassesChecked { glasses_detected } => {
                        MachineInput::GlassesChecked { glasses_detected }
                    }
                    PipelineProgress::GlassesRemoved => MachineInput::GlassesRemoved,
                };
                self.apply(input).await;
            }
            PipelineMessage::Finished { attempt, result } if attempt == self.attempt => {
                self.pipeline_cancel = None;
                match result {
                    Ok(data) => self.complete(data).await,
                    Err(PipelineError::Cancelled) => {
                        debug!("Capture attempt {} cancelled", attempt);
                    }
                    Err(e) => {
                        self.apply(MachineInput::PipelineFailed {
                            reason: e.to_string(),
                        })
                        .await;
                        if let Some(reason) = self.camera_lost.take() {
                            self.apply(MachineInput::CameraUnavailable { reason }).await;
                        }
                    }
                }
            }
            PipelineMessage::Progress { attempt, .. } | PipelineMessage::Finished { attempt, .. } => {
                debug!("Discarding message from stale capture attempt {}", attempt);
            }
        }
    }

    async fn complete(&mut self, data: CapturedData) {
        let delivered = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                info!("Session shutting down, capture record discarded");
                return;
            }
            result = self.sink.deliver(&data) => result,
        };

        if let Err(e) = delivered {
            warn!("Capture record not delivered: {}", e);
            self.publish(FitcamEvent::SystemError {
                component: "capture_sink".to_string(),
                error: e.to_string(),
            })
            .await;
        }

        self.apply(MachineInput::PipelineSucceeded).await;

        self.publish(FitcamEvent::CaptureCompleted {
            glasses_detected: data.glasses_detected(),
            pd: data.measurements().pd,
            face_shape: data.face_shape().map(str::to_string),
            timestamp: SystemTime::now(),
        })
        .await;

        self.completed = Some(data);
    }

    async fn apply(&mut self, input: MachineInput) {
        let outcome = self.machine.handle(input);

        for transition in &outcome.transitions {
            self.state_tx.send_replace(transition.to);
            self.publish(FitcamEvent::CaptureStateChanged {
                from: transition.from,
                to: transition.to,
                timestamp: SystemTime::now(),
            })
            .await;
            if let CaptureState::Countdown(remaining) = transition.to {
                self.publish(FitcamEvent::CountdownTick { remaining }).await;
            }
        }

        for action in outcome.actions {
            self.execute(action).await;
        }
    }

    async fn execute(&mut self, action: MachineAction) {
        match action {
            MachineAction::StartCountdown { from } => self.timer.start(from),
            MachineAction::CancelCountdown => self.timer.cancel(),
            MachineAction::SilenceGuidance => self.voice.silence(),
            MachineAction::StartPipeline => self.start_pipeline(),
            MachineAction::NotifyFailure { message, reason } => {
                debug!("Notifying failure: {} ({})", message, reason);
                self.publish(FitcamEvent::CaptureFailed { reason, message })
                    .await;
            }
            MachineAction::OfferCameraRetry { reason } => {
                info!("Camera unavailable: {}", reason);
                if let Some(interval) = self.settings.retry_interval {
                    self.retry_at = Some(Instant::now() + interval);
                    debug!("Camera retry scheduled in {:?}", interval);
                }
            }
            MachineAction::ReleaseCamera => {
                self.camera.release();
            }
        }
    }

    fn start_pipeline(&mut self) {
        if let Some(previous) = self.pipeline_cancel.take() {
            previous.cancel();
        }

        self.attempt += 1;
        let attempt = self.attempt;
        let cancel = self.cancel.child_token();
        self.pipeline_cancel = Some(cancel.clone());

        // Frame and landmarks are frozen here, at the end of the countdown
        let frame = self.frames.latest();
        let landmarks = self.current.landmarks.clone();
        let pipeline = Arc::clone(&self.pipeline);
        let tx = self.pipeline_tx.clone();
        let (mirror, quality) = (self.settings.mirror_capture, self.settings.jpeg_quality);

        info!("Capture attempt {} started", attempt);
        tokio::spawn(async move {
            let progress_tx = tx.clone();
            let result = match PipelineInput::capture(frame, landmarks, mirror, quality).await {
                Ok(input) => {
                    pipeline
                        .run(input, &cancel, move |progress| {
                            let _ = progress_tx.send(PipelineMessage::Progress { attempt, progress });
                        })
                        .await
                }
                Err(e) => Err(e),
            };
            let _ = tx.send(PipelineMessage::Finished { attempt, result });
        });
    }

    async fn teardown(&mut self, engine_cancel: CancellationToken, engine_task: JoinHandle<()>) {
        self.timer.cancel();
        if let Some(cancel) = self.pipeline_cancel.take() {
            cancel.cancel();
        }
        self.voice.silence();

        engine_cancel.cancel();
        match timeout(Duration::from_secs(3), engine_task).await {
            Ok(Ok(())) => debug!("Validation loop stopped"),
            Ok(Err(e)) => error!("Validation loop failed: {}", e),
            Err(_) => warn!("Validation loop did not stop within timeout"),
        }

        self.camera.release();
    }

    async fn publish(&self, event: FitcamEvent) {
        if let Err(e) = self.event_bus.publish(event).await {
            trace!("Event not delivered: {}", e);
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
