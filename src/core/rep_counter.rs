// Repetition counting - hysteresis over per-frame posture labels

use crate::models::exercise::PostureLabel;
use serde::{Deserialize, Serialize};

/// Whether a raised posture has already been counted since the last relax
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepState {
    /// Waiting for a raised posture; the next one counts
    Disarmed,
    /// A raised posture was counted; further raised frames are ignored until relaxed
    Armed,
}

/// Counts repetitions from a stream of classified frames
///
/// A rep is one `Relaxed → Raised` cycle. The first raised posture of a run
/// counts even without a preceding relaxed frame, and a raised posture held
/// across frames counts once.
#[derive(Debug, Clone)]
pub struct RepCounter {
    state: RepState,
    count: u32,
}

impl RepCounter {
    pub fn new() -> Self {
        Self {
            state: RepState::Disarmed,
            count: 0,
        }
    }

    /// Advance by one classified frame, returning true when a rep was counted
    pub fn observe(&mut self, label: PostureLabel) -> bool {
        match (label, self.state) {
            (PostureLabel::Relaxed, _) => {
                self.state = RepState::Disarmed;
                false
            }
            (PostureLabel::Raised, RepState::Disarmed) => {
                self.count += 1;
                self.state = RepState::Armed;
                true
            }
            (PostureLabel::Raised, RepState::Armed) | (PostureLabel::Other, _) => false,
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn state(&self) -> RepState {
        self.state
    }

    /// Consume the counter, returning the final count
    pub fn finish(self) -> u32 {
        self.count
    }
}

impl Default for RepCounter {
    fn default() -> Self {
        Self::new()
    }
}
