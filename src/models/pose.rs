// Data models for body pose landmarks consumed by the rep counter

use serde::{Deserialize, Serialize};

// ==============================================================================
// Pose Snapshot (one frame)
// ==============================================================================

/// Body landmarks detected in a single frame, indexed by [`BodyLandmark`]
///
/// Only exists for the frame it was detected in; a frame without a detected
/// subject has no snapshot at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoseSnapshot {
    pub landmarks: Vec<Keypoint3D>, // 33 body landmarks, normalized to the frame
}

impl PoseSnapshot {
    pub fn new(landmarks: Vec<Keypoint3D>) -> Self {
        Self { landmarks }
    }

    /// Look up a landmark by name
    pub fn landmark(&self, landmark: BodyLandmark) -> Option<&Keypoint3D> {
        self.landmarks.get(landmark.index())
    }
}

/// MediaPipe Pose Landmark indices (33 total)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BodyLandmark {
    Nose = 0,
    LeftEyeInner = 1,
    LeftEye = 2,
    LeftEyeOuter = 3,
    RightEyeInner = 4,
    RightEye = 5,
    RightEyeOuter = 6,
    LeftEar = 7,
    RightEar = 8,
    MouthLeft = 9,
    MouthRight = 10,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftPinky = 17,
    RightPinky = 18,
    LeftIndex = 19,
    RightIndex = 20,
    LeftThumb = 21,
    RightThumb = 22,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
    LeftHeel = 29,
    RightHeel = 30,
    LeftFootIndex = 31,
    RightFootIndex = 32,
}

impl BodyLandmark {
    pub const COUNT: usize = 33;

    pub fn index(self) -> usize {
        self as u8 as usize
    }
}

// ==============================================================================
// Shared: 3D Keypoint
// ==============================================================================

/// A 3D keypoint with visibility score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint3D {
    pub x: f32, // Normalized [0, 1] relative to frame width
    pub y: f32, // Normalized [0, 1] relative to frame height
    pub z: f32, // Depth relative to the hip midpoint
    pub visibility: f32, // [0, 1]
}

impl Keypoint3D {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    pub fn is_visible(&self, threshold: f32) -> bool {
        self.visibility >= threshold
    }
}

// ==============================================================================
// Configuration
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseConfig {
    pub min_detection_confidence: f32, // Minimum confidence for detection (default: 0.5)
    pub min_tracking_confidence: f32,  // Minimum confidence for tracking (default: 0.5)
    pub model_complexity: ModelComplexity,
    /// Arm landmarks below this visibility skip the frame (0.0 disables the check)
    #[serde(default)]
    pub min_landmark_visibility: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelComplexity {
    Lite = 0,  // Fastest, less accurate
    Full = 1,  // Balanced
    Heavy = 2, // Slowest, most accurate
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            min_detection_confidence: 0.5,
            min_tracking_confidence: 0.5,
            model_complexity: ModelComplexity::Full,
            min_landmark_visibility: 0.0,
        }
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum PoseError {
    #[error("No pose detected in frame")]
    NoPoseDetected,

    #[error("Landmark {0:?} missing from pose")]
    LandmarkMissing(BodyLandmark),

    #[error("Landmark {0:?} below visibility threshold")]
    LandmarkNotVisible(BodyLandmark),

    #[error("Model loading failed: {0}")]
    ModelLoadFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

impl PoseError {
    /// Frame-level conditions: the frame is skipped and processing continues
    pub fn is_frame_skip(&self) -> bool {
        matches!(
            self,
            PoseError::NoPoseDetected
                | PoseError::LandmarkMissing(_)
                | PoseError::LandmarkNotVisible(_)
        )
    }
}

pub type PoseResult<T> = Result<T, PoseError>;
