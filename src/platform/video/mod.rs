// Video decoding platform integration
// Frame sources produce decoded RGB frames from a video file, in order

pub mod ffmpeg_cli;
#[cfg(feature = "ffmpeg-native")]
pub mod ffmpeg_native;

pub use ffmpeg_cli::{FfmpegCliOpener, FfmpegCliSource};
#[cfg(feature = "ffmpeg-native")]
pub use ffmpeg_native::{NativeFrameOpener, NativeFrameSource};

use crate::models::frame::{Frame, SourceResult};
use std::collections::VecDeque;
use std::path::Path;

/// A finite, non-restartable sequence of decoded frames
///
/// Dropping a source releases every resource it holds, so a source is closed
/// on all exit paths of whoever owns it.
pub trait FrameSource: Send {
    /// Next decoded frame; `Ok(None)` once the stream is exhausted
    fn next_frame(&mut self) -> SourceResult<Option<Frame>>;
}

/// Opens a frame source for a video file
pub trait FrameSourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> SourceResult<Box<dyn FrameSource>>;
}

/// Frames decoded elsewhere, replayed in order
#[derive(Debug, Default)]
pub struct MemoryFrameSource {
    frames: VecDeque<Frame>,
}

impl MemoryFrameSource {
    pub fn new(frames: Vec<Frame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl FrameSource for MemoryFrameSource {
    fn next_frame(&mut self) -> SourceResult<Option<Frame>> {
        Ok(self.frames.pop_front())
    }
}
