use serde::{Deserialize, Serialize};

/// Normalized (0-1) landmark coordinate
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y, z: 0.0 }
    }
}

/// Facial reference points extracted by a landmark detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceLandmarks {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose_tip: Point,
    pub chin: Point,
    pub forehead: Point,
    pub face_left: Point,
    pub face_right: Point,
    pub left_ear: Point,
    pub right_ear: Point,
    pub left_eye_upper: Point,
    pub left_eye_lower: Point,
    pub right_eye_upper: Point,
    pub right_eye_lower: Point,
}

impl FaceLandmarks {
    /// Face width as a fraction of the frame width
    pub fn face_width(&self) -> f64 {
        (self.face_right.x - self.face_left.x).abs()
    }

    /// Face width as a percentage of the frame width, capped at 100
    pub fn face_width_percent(&self) -> f64 {
        (self.face_width() * 100.0).min(100.0)
    }

    pub fn left_eye_ratio(&self) -> f64 {
        (self.left_eye_upper.y - self.left_eye_lower.y).abs()
    }

    pub fn right_eye_ratio(&self) -> f64 {
        (self.right_eye_upper.y - self.right_eye_lower.y).abs()
    }

    /// Roll of the eye line in degrees, folded into [-90, 90]
    pub fn head_tilt_degrees(&self) -> f64 {
        let dy = self.right_eye.y - self.left_eye.y;
        let dx = self.right_eye.x - self.left_eye.x;
        let angle = dy.atan2(dx).to_degrees();

        // A mirrored eye order reads as ~180°; it is the same head pose
        if angle > 90.0 {
            angle - 180.0
        } else if angle < -90.0 {
            angle + 180.0
        } else {
            angle
        }
    }

    /// Approximate yaw from the nose offset against the face centre
    pub fn head_rotation_degrees(&self) -> f64 {
        let width = self.face_right.x - self.face_left.x;
        if width.abs() < f64::EPSILON {
            return 0.0;
        }

        let center = (self.face_left.x + self.face_right.x) / 2.0;
        (self.nose_tip.x - center) / width * 60.0
    }

    /// Landmarks consistent with the given pose
    pub fn from_pose(pose: &FacePose) -> Self {
        let width = pose.face_width_percent / 100.0;
        let half = width / 2.0;
        let (cx, cy) = (pose.center_x, pose.center_y);

        let tilt = pose.tilt_degrees.to_radians();
        let eye_half_span = width * 0.225;
        let (dx, dy) = (eye_half_span * tilt.cos(), eye_half_span * tilt.sin());
        let left_eye = Point::new(cx - dx, cy - width * 0.1 - dy);
        let right_eye = Point::new(cx + dx, cy - width * 0.1 + dy);

        let lid = pose.eye_openness / 2.0;
        let upper = |eye: Point| Point::new(eye.x, eye.y - lid);
        let lower = |eye: Point| Point::new(eye.x, eye.y + lid);

        Self {
            left_eye,
            right_eye,
            nose_tip: Point::new(cx + pose.rotation_degrees / 60.0 * width, cy + width * 0.1),
            chin: Point::new(cx, cy + width * 0.6),
            forehead: Point::new(cx, cy - width * 0.6),
            face_left: Point::new(cx - half, cy),
            face_right: Point::new(cx + half, cy),
            left_ear: Point::new(cx - half, cy - width * 0.05),
            right_ear: Point::new(cx + half, cy - width * 0.05),
            left_eye_upper: upper(left_eye),
            left_eye_lower: lower(left_eye),
            right_eye_upper: upper(right_eye),
            right_eye_lower: lower(right_eye),
        }
    }
}

/// Compact description of a head pose
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacePose {
    pub face_width_percent: f64,
    pub eye_openness: f64,
    pub tilt_degrees: f64,
    pub rotation_degrees: f64,
    pub center_x: f64,
    pub center_y: f64,
}

impl Default for FacePose {
    fn default() -> Self {
        Self {
            face_width_percent: 45.0,
            eye_openness: 0.02,
            tilt_degrees: 0.0,
            rotation_degrees: 0.0,
            center_x: 0.5,
            center_y: 0.5,
        }
    }
}
