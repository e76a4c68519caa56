use std::path::{Path, PathBuf};
use std::time::Duration;

use image::RgbImage;

use crate::error::Result;
use crate::planner::TrimPlan;

/// Metadata of an opened input clip.
#[derive(Debug, Clone, PartialEq)]
pub struct Clip {
    pub path: PathBuf,
    pub frame_count: u64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

impl Clip {
    /// Time spanned by `frames` frames at the nominal rate.
    pub fn span(&self, frames: u64) -> Duration {
        if self.fps > 0.0 {
            Duration::from_secs_f64(frames as f64 / self.fps)
        } else {
            Duration::ZERO
        }
    }
}

/// Position of a decoded frame in the original clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub index: u64,
    /// Presentation time relative to the start of the video stream.
    pub timestamp: Duration,
}

/// One decoded, full resolution frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub info: FrameInfo,
    pub image: RgbImage,
}

/// Ordered stream of decoded frames for one clip.
pub trait FrameSource {
    /// Decodes the next frame and converts it to RGB. `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Decodes the next frame without converting its pixels.
    fn skip_frame(&mut self) -> Result<Option<FrameInfo>>;
}

/// Decode and write side of the video stack.
pub trait VideoBackend {
    type Source: FrameSource;

    /// Opens `path` and returns its metadata with a fresh frame stream.
    fn open(&self, path: &Path) -> Result<(Clip, Self::Source)>;

    /// Writes everything from `plan.trim_frame_index` onward to `output`.
    /// A boundary of 0 must produce a full copy of the input's video, audio
    /// and subtitle streams. Data and attachment streams are not carried over.
    /// On error `output` is left untouched.
    fn write_trimmed(&self, clip: &Clip, plan: &TrimPlan, output: &Path) -> Result<()>;
}
