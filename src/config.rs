use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FitcamConfig {
    pub camera: CameraConfig,
    pub validation: ValidationConfig,
    pub voice: VoiceConfig,
    pub countdown: CountdownConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub system: SystemConfig,
}

/// Which camera backend to open
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackend {
    /// Generated frames, no hardware required
    Synthetic,
    /// V4L2 device through GStreamer (requires the `camera` feature)
    V4l2,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Camera backend
    #[serde(default = "default_camera_backend")]
    pub backend: CameraBackend,

    /// Camera device index (e.g., 0 for /dev/video0)
    #[serde(default = "default_camera_index")]
    pub index: u32,

    /// Requested resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Mean gray level produced by the synthetic backend
    #[serde(default = "default_synthetic_brightness")]
    pub synthetic_brightness: u8,

    /// Delay before re-requesting a denied camera automatically (0 disables)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

/// Layout profile resolved once at startup
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProfile {
    Desktop,
    Mobile,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ValidationConfig {
    /// Desktop or mobile thresholds
    #[serde(default = "default_device_profile")]
    pub profile: DeviceProfile,

    /// Interval between validation samples in milliseconds
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Minimum face width as a percentage of the frame width
    #[serde(default = "default_min_face_width_percent")]
    pub min_face_width_percent: f64,

    /// Maximum face width as a percentage of the frame width
    #[serde(default = "default_max_face_width_percent")]
    pub max_face_width_percent: f64,

    /// Eye aspect ratio above which an eye counts as open
    #[serde(default = "default_eye_aspect_ratio_threshold")]
    pub eye_aspect_ratio_threshold: f64,

    /// Maximum head tilt in degrees
    #[serde(default = "default_max_head_tilt")]
    pub max_head_tilt: f64,

    /// Maximum head rotation (yaw) in degrees
    #[serde(default = "default_max_head_rotation")]
    pub max_head_rotation: f64,

    /// Minimum mean frame brightness (0-255)
    #[serde(default = "default_min_brightness")]
    pub min_brightness: f64,

    /// Maximum mean frame brightness (0-255)
    #[serde(default = "default_max_brightness")]
    pub max_brightness: f64,

    /// Weight of the newest face width sample (1.0 disables smoothing)
    #[serde(default = "default_face_width_smoothing")]
    pub face_width_smoothing: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VoiceConfig {
    /// Enable spoken guidance
    #[serde(default = "default_voice_enabled")]
    pub enabled: bool,

    /// Minimum interval between two utterances in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// External text-to-speech program (e.g. "espeak"); guidance is logged when unset
    #[serde(default)]
    pub command: Option<String>,

    /// Extra arguments passed before the phrase
    #[serde(default)]
    pub command_args: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CountdownConfig {
    /// First number shown when the countdown starts
    #[serde(default = "default_countdown_start")]
    pub start: u8,

    /// Duration of one countdown step in milliseconds
    #[serde(default = "default_countdown_tick_ms")]
    pub tick_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PipelineConfig {
    /// Base URL of the measurement service
    #[serde(default = "default_pipeline_base_url")]
    pub base_url: String,

    /// Timeout applied to each processing stage in seconds
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,

    /// Guest identifier sent with every request (generated when unset)
    #[serde(default)]
    pub guest_id: Option<String>,

    /// Session identifier sent with every request (generated when unset)
    #[serde(default)]
    pub session_id: Option<String>,

    /// JPEG quality of the captured frame
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,

    /// Mirror the captured frame horizontally, matching the preview
    #[serde(default = "default_mirror_capture")]
    pub mirror_capture: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct OutputConfig {
    /// Directory receiving capture records
    #[serde(default = "default_output_path")]
    pub path: String,

    /// Write the finished capture record as JSON
    #[serde(default = "default_save_capture")]
    pub save_capture: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl CountdownConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

impl FitcamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("fitcam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.backend", "synthetic")?
            .set_default("camera.index", default_camera_index())?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.synthetic_brightness", default_synthetic_brightness() as u32)?
            .set_default("camera.retry_interval_ms", default_retry_interval_ms())?
            .set_default("validation.profile", "desktop")?
            .set_default("validation.sample_interval_ms", default_sample_interval_ms())?
            .set_default(
                "validation.min_face_width_percent",
                default_min_face_width_percent(),
            )?
            .set_default(
                "validation.max_face_width_percent",
                default_max_face_width_percent(),
            )?
            .set_default(
                "validation.eye_aspect_ratio_threshold",
                default_eye_aspect_ratio_threshold(),
            )?
            .set_default("validation.max_head_tilt", default_max_head_tilt())?
            .set_default("validation.max_head_rotation", default_max_head_rotation())?
            .set_default("validation.min_brightness", default_min_brightness())?
            .set_default("validation.max_brightness", default_max_brightness())?
            .set_default(
                "validation.face_width_smoothing",
                default_face_width_smoothing(),
            )?
            .set_default("voice.enabled", default_voice_enabled())?
            .set_default("voice.debounce_ms", default_debounce_ms())?
            .set_default("voice.command_args", Vec::<String>::new())?
            .set_default("countdown.start", default_countdown_start() as u32)?
            .set_default("countdown.tick_ms", default_countdown_tick_ms())?
            .set_default("pipeline.base_url", default_pipeline_base_url())?
            .set_default("pipeline.stage_timeout_secs", default_stage_timeout_secs())?
            .set_default("pipeline.jpeg_quality", default_jpeg_quality() as u32)?
            .set_default("pipeline.mirror_capture", default_mirror_capture())?
            .set_default("output.path", default_output_path())?
            .set_default("output.save_capture", default_save_capture())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // Environment overrides, e.g. FITCAM_VOICE__DEBOUNCE_MS=2000
            .add_source(Environment::with_prefix("FITCAM").separator("__"))
            .build()?;

        let config: FitcamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 || self.camera.fps > MAX_CAMERA_FPS {
            return Err(ConfigError::Message(format!(
                "Camera fps must be between 1 and {}",
                MAX_CAMERA_FPS
            )));
        }

        if self.validation.sample_interval_ms == 0 {
            return Err(ConfigError::Message(
                "Validation sample_interval_ms must be greater than 0".to_string(),
            ));
        }

        if self.validation.min_face_width_percent >= self.validation.max_face_width_percent {
            return Err(ConfigError::Message(
                "Validation min_face_width_percent must be below max_face_width_percent"
                    .to_string(),
            ));
        }

        if self.validation.min_brightness >= self.validation.max_brightness {
            return Err(ConfigError::Message(
                "Validation min_brightness must be below max_brightness".to_string(),
            ));
        }

        if !(self.validation.face_width_smoothing > 0.0
            && self.validation.face_width_smoothing <= 1.0)
        {
            return Err(ConfigError::Message(
                "Validation face_width_smoothing must be in (0, 1]".to_string(),
            ));
        }

        if self.countdown.start == 0 {
            return Err(ConfigError::Message(
                "Countdown start must be greater than 0".to_string(),
            ));
        }

        if self.countdown.tick_ms == 0 {
            return Err(ConfigError::Message(
                "Countdown tick_ms must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.stage_timeout_secs == 0 {
            return Err(ConfigError::Message(
                "Pipeline stage_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.jpeg_quality == 0 || self.pipeline.jpeg_quality > 100 {
            return Err(ConfigError::Message(
                "Pipeline jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for FitcamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                backend: default_camera_backend(),
                index: default_camera_index(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                synthetic_brightness: default_synthetic_brightness(),
                retry_interval_ms: default_retry_interval_ms(),
            },
            validation: ValidationConfig {
                profile: default_device_profile(),
                sample_interval_ms: default_sample_interval_ms(),
                min_face_width_percent: default_min_face_width_percent(),
                max_face_width_percent: default_max_face_width_percent(),
                eye_aspect_ratio_threshold: default_eye_aspect_ratio_threshold(),
                max_head_tilt: default_max_head_tilt(),
                max_head_rotation: default_max_head_rotation(),
                min_brightness: default_min_brightness(),
                max_brightness: default_max_brightness(),
                face_width_smoothing: default_face_width_smoothing(),
            },
            voice: VoiceConfig {
                enabled: default_voice_enabled(),
                debounce_ms: default_debounce_ms(),
                command: None,
                command_args: Vec::new(),
            },
            countdown: CountdownConfig {
                start: default_countdown_start(),
                tick_ms: default_countdown_tick_ms(),
            },
            pipeline: PipelineConfig {
                base_url: default_pipeline_base_url(),
                stage_timeout_secs: default_stage_timeout_secs(),
                guest_id: None,
                session_id: None,
                jpeg_quality: default_jpeg_quality(),
                mirror_capture: default_mirror_capture(),
            },
            output: OutputConfig {
                path: default_output_path(),
                save_capture: default_save_capture(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_backend() -> CameraBackend {
    CameraBackend::Synthetic
}
fn default_camera_index() -> u32 {
    0
}
fn default_camera_resolution() -> (u32, u32) {
    (1280, 720)
}
/// Frame periods are whole milliseconds
pub const MAX_CAMERA_FPS: u32 = 1000;

fn default_camera_fps() -> u32 {
    30
}
fn default_synthetic_brightness() -> u8 {
    150
}
fn default_retry_interval_ms() -> u64 {
    0
}

fn default_device_profile() -> DeviceProfile {
    DeviceProfile::Desktop
}
fn default_sample_interval_ms() -> u64 {
    100
}
fn default_min_face_width_percent() -> f64 {
    15.0
}
fn default_max_face_width_percent() -> f64 {
    70.0
}
fn default_eye_aspect_ratio_threshold() -> f64 {
    0.01
}
fn default_max_head_tilt() -> f64 {
    10.0
}
fn default_max_head_rotation() -> f64 {
    15.0
}
fn default_min_brightness() -> f64 {
    80.0
}
fn default_max_brightness() -> f64 {
    220.0
}
fn default_face_width_smoothing() -> f64 {
    0.2
}

fn default_voice_enabled() -> bool {
    true
}
fn default_debounce_ms() -> u64 {
    3000
}

fn default_countdown_start() -> u8 {
    3
}
fn default_countdown_tick_ms() -> u64 {
    1000
}

fn default_pipeline_base_url() -> String {
    "http://127.0.0.1:8000".to_string()
}
fn default_stage_timeout_secs() -> u64 {
    30
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_mirror_capture() -> bool {
    true
}

fn default_output_path() -> String {
    "./captures".to_string()
}
fn default_save_capture() -> bool {
    true
}

fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = FitcamConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.voice.debounce_ms, 3000);
        assert_eq!(config.countdown.start, 3);
        assert_eq!(config.countdown.tick(), Duration::from_secs(1));
        assert_eq!(config.validation.min_face_width_percent, 15.0);
        assert_eq!(config.validation.max_face_width_percent, 70.0);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[voice]\ndebounce_ms = 1500\n\n[validation]\nprofile = \"mobile\"\n\n[camera]\nbackend = \"synthetic\"\nresolution = [640, 480]"
        )
        .unwrap();

        let config = FitcamConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.voice.debounce_ms, 1500);
        assert_eq!(config.validation.profile, DeviceProfile::Mobile);
        assert_eq!(config.camera.resolution, (640, 480));
        // Untouched sections keep their defaults
        assert_eq!(config.countdown.tick_ms, 1000);
        assert_eq!(config.pipeline.jpeg_quality, 90);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = FitcamConfig::load_from_file("does-not-exist.toml").unwrap();

        assert_eq!(config.camera.backend, CameraBackend::Synthetic);
        assert_eq!(config.validation.sample_interval_ms, 100);
    }

    #[test]
    fn test_config_validation() {
        let mut config = FitcamConfig::default();
        config.camera.resolution = (0, 0);
        assert!(config.validate().is_err());

        config.camera.resolution = (640, 480);
        assert!(config.validate().is_ok());

        config.validation.min_face_width_percent = 80.0;
        assert!(config.validate().is_err());
        config.validation.min_face_width_percent = 15.0;

        config.validation.face_width_smoothing = 0.0;
        assert!(config.validate().is_err());
        config.validation.face_width_smoothing = 1.0;

        config.countdown.start = 0;
        assert!(config.validate().is_err());
        config.countdown.start = 3;

        config.camera.fps = MAX_CAMERA_FPS + 1;
        assert!(config.validate().is_err());
        config.camera.fps = MAX_CAMERA_FPS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serializes_to_toml() {
        let rendered = toml::to_string_pretty(&FitcamConfig::default()).unwrap();

        assert!(rendered.contains("[voice]"));
        assert!(rendered.contains("debounce_ms = 3000"));
        assert!(rendered.contains("backend = \"synthetic\""));
    }
}
