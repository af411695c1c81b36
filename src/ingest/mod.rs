//! Frame ingestion sources.
//!
//! - Uploaded video files (`FileSource`, decoding needs feature: ingest-file-ffmpeg)
//! - Live cameras (`CameraSource`, V4L2 devices need feature: ingest-v4l2)
//! - `stub://` synthetic sources for both, used by tests and demos
//!
//! Sources are blocking and are driven from a blocking task; none of them
//! needs to be `Send` once opened.

use anyhow::Result;

use crate::frame::Frame;

pub mod camera;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
mod normalize;
mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use camera::CameraSource;
pub use file::{FileConfig, FileSource, FileStats};
pub(crate) use synthetic::is_synthetic;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// A blocking, pull-based source of RGB frames.
pub trait FrameSource {
    /// Human readable name used in logs.
    fn describe(&self) -> String;

    /// Next frame, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }
}
