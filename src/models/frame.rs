// Data structures for decoded video frames

use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A decoded frame from a video source
#[derive(Debug, Clone)]
pub struct Frame {
    pub index: u64,
    pub timestamp_ms: Option<i64>,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: u64, timestamp_ms: Option<i64>, image: RgbImage) -> Self {
        Self {
            index,
            timestamp_ms,
            image,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Basic properties of the video stream being decoded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
}

impl StreamInfo {
    /// Presentation time of the nth frame, when the frame rate is known
    pub fn timestamp_ms(&self, index: u64) -> Option<i64> {
        self.fps
            .filter(|fps| *fps > 0.0)
            .map(|fps| (index as f64 * 1000.0 / fps).round() as i64)
    }
}

/// Error types for frame sources
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Cannot open video {}: {reason}", .path.display())]
    Unreadable { path: PathBuf, reason: String },

    #[error("Decode failed at frame {frame}: {reason}")]
    Decode { frame: u64, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SourceResult<T> = Result<T, SourceError>;
