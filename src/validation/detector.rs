use super::landmarks::{FaceLandmarks, FacePose};
use crate::error::DetectionError;
use crate::frame::FrameData;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, trace};

/// Source of facial landmarks for a frame
#[async_trait]
pub trait LandmarkDetector: Send + Sync {
    /// Landmarks of the most prominent face, `None` when no face is visible
    async fn detect(&self, frame: &FrameData) -> Result<Option<FaceLandmarks>, DetectionError>;
}

/// One step of a replay script
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptSegment {
    pub hold_ms: u64,
    #[serde(default)]
    pub pose: Option<FacePose>,
}

/// Detector that replays a timed sequence of poses.
///
/// Time is measured from the first `detect` call; the last segment holds
/// forever once the script has run out.
pub struct ScriptedDetector {
    segments: Vec<ScriptSegment>,
    started: Mutex<Option<Instant>>,
}

impl ScriptedDetector {
    pub fn new(segments: Vec<ScriptSegment>) -> Result<Self, DetectionError> {
        if segments.is_empty() {
            return Err(DetectionError::Script {
                details: "script has no segments".to_string(),
            });
        }

        Ok(Self {
            segments,
            started: Mutex::new(None),
        })
    }

    /// Same pose on every frame
    pub fn fixed(pose: Option<FacePose>) -> Self {
        Self {
            segments: vec![ScriptSegment { hold_ms: 0, pose }],
            started: Mutex::new(None),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DetectionError> {
        let segments: Vec<ScriptSegment> =
            serde_json::from_str(json).map_err(|e| DetectionError::Script {
                details: e.to_string(),
            })?;
        Self::new(segments)
    }

    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, DetectionError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DetectionError::Script {
                details: format!("{}: {}", path.display(), e),
            })?;
        let detector = Self::from_json(&json)?;
        info!(
            "Loaded replay script {} ({} segments, {:?})",
            path.display(),
            detector.segments.len(),
            detector.duration()
        );
        Ok(detector)
    }

    /// Walk-up demo: too far, settling, a blink, then a steady pose
    pub fn demo() -> Self {
        let pose = |face_width_percent: f64, eye_openness: f64, tilt_degrees: f64| FacePose {
            face_width_percent,
            eye_openness,
            tilt_degrees,
            ..FacePose::default()
        };

        Self {
            segments: vec![
                ScriptSegment {
                    hold_ms: 1500,
                    pose: None,
                },
                ScriptSegment {
                    hold_ms: 4000,
                    pose: Some(pose(10.0, 0.02, 0.0)),
                },
                ScriptSegment {
                    hold_ms: 3500,
                    pose: Some(pose(40.0, 0.02, 14.0)),
                },
                ScriptSegment {
                    hold_ms: 2000,
                    pose: Some(pose(45.0, 0.02, 2.0)),
                },
                ScriptSegment {
                    hold_ms: 500,
                    pose: Some(pose(45.0, 0.002, 2.0)),
                },
                ScriptSegment {
                    hold_ms: 0,
                    pose: Some(pose(45.0, 0.02, 1.0)),
                },
            ],
            started: Mutex::new(None),
        }
    }

    /// Total scripted time before the last segment takes over
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.segments.iter().map(|s| s.hold_ms).sum())
    }

    fn pose_at(&self, elapsed: Duration) -> Option<FacePose> {
        let elapsed_ms = elapsed.as_millis() as u64;
        let mut end = 0u64;
        for segment in &self.segments {
            end += segment.hold_ms;
            if elapsed_ms < end {
                return segment.pose;
            }
        }
        self.segments.last().and_then(|segment| segment.pose)
    }
}

#[async_trait]
impl LandmarkDetector for ScriptedDetector {
    async fn detect(&self, frame: &FrameData) -> Result<Option<FaceLandmarks>, DetectionError> {
        let now = Instant::now();
        let started = *self.started.lock().get_or_insert(now);

        let pose = self.pose_at(now.duration_since(started));
        trace!(
            "Scripted pose for frame {}: {}",
            frame.id,
            if pose.is_some() { "face" } else { "no face" }
        );
        Ok(pose.as_ref().map(FaceLandmarks::from_pose))
    }
}
