// Data models for posture classification and repetition counting

use serde::{Deserialize, Serialize};

// ==============================================================================
// Feature Vector
// ==============================================================================

/// Classifier input: elbow angles in degrees, left arm first
///
/// The column order is part of the contract with every trained artifact.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub angle_left: f64,
    pub angle_right: f64,
}

impl FeatureVector {
    pub const LEN: usize = 2;

    pub fn new(angle_left: f64, angle_right: f64) -> Self {
        Self {
            angle_left,
            angle_right,
        }
    }

    pub fn as_array(&self) -> [f64; Self::LEN] {
        [self.angle_left, self.angle_right]
    }

    pub fn get(&self, feature: usize) -> Option<f64> {
        match feature {
            0 => Some(self.angle_left),
            1 => Some(self.angle_right),
            _ => None,
        }
    }
}

// ==============================================================================
// Posture Labels
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostureLabel {
    Raised,
    Relaxed,
    Other,
}

impl PostureLabel {
    pub fn to_string(&self) -> &'static str {
        match self {
            PostureLabel::Raised => "raised",
            PostureLabel::Relaxed => "relaxed",
            PostureLabel::Other => "other",
        }
    }
}

/// Mapping from a classifier artifact's raw output codes to [`PostureLabel`]
///
/// | version | raised | relaxed | anything else |
/// |---------|--------|---------|---------------|
/// | `v1`    | 0      | 2       | Other         |
///
/// Retraining an artifact with a different encoding needs a new variant here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelEncoding {
    #[default]
    V1,
}

impl LabelEncoding {
    pub fn decode(&self, code: i64) -> PostureLabel {
        match self {
            LabelEncoding::V1 => match code {
                0 => PostureLabel::Raised,
                2 => PostureLabel::Relaxed,
                _ => PostureLabel::Other,
            },
        }
    }

    pub fn to_string(&self) -> &'static str {
        match self {
            LabelEncoding::V1 => "v1",
        }
    }
}

// ==============================================================================
// Run Results
// ==============================================================================

/// Per-run frame accounting returned alongside the repetition count
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub frames_total: u64,
    pub frames_without_pose: u64,
    pub frames_degenerate: u64,
    pub frames_other: u64,
    pub reps: u32,
}

/// Aggregate result handed to the result sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepCountRecord {
    pub id: String,
    pub exercise_id: String,
    pub filename: String,
    pub reps: u32,
    pub processed_at: i64, // Unix millis
}

/// One logged training set: load, volume and optional notes for an exercise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionEntry {
    pub id: String,
    pub exercise_id: String,
    pub weight_kg: f64,
    pub reps: u32,
    pub sets: u32,
    pub notes: Option<String>,
    pub recorded_at: i64, // Unix millis
}

impl ProgressionEntry {
    /// New entry stamped now; blank notes are dropped
    pub fn new(exercise_id: &str, weight_kg: f64, reps: u32, sets: u32, notes: Option<&str>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            exercise_id: exercise_id.to_string(),
            weight_kg,
            reps,
            sets,
            notes: notes
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            recorded_at: chrono::Utc::now().timestamp_millis(),
        }
    }
}

// ==============================================================================
// Error Types
// ==============================================================================

/// Caller-facing failure of a whole processing run
///
/// A run yields either a count or one of these, never both.
#[derive(Debug, thiserror::Error)]
pub enum RepCountError {
    #[error("Unsupported exercise: {0}")]
    UnsupportedExercise(String),

    #[error("Video source unreadable: {0}")]
    SourceUnreadable(String),

    #[error("Model loading failed: {0}")]
    ModelLoadFailed(String),

    #[error("Inference failed: {0}")]
    InferenceFailed(String),
}

pub type RepCountResult<T> = Result<T, RepCountError>;
