//! Local file frame source.
//!
//! `FileSource` decodes an uploaded video (or a `stub://` synthetic clip)
//! one frame at a time. It is finite: once the container is exhausted or a
//! decode error occurs the source reports end-of-stream and stays there.
//! The decoder handle is released when the source is dropped.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::synthetic::{is_synthetic, SyntheticSource};
use super::FrameSource;
use crate::frame::Frame;

/// Synthetic clips without an explicit `frames=` parameter stop here.
const DEFAULT_SYNTHETIC_FRAMES: u64 = 30;

/// Configuration for a local file source.
#[derive(Clone, Debug, Default)]
pub struct FileConfig {
    /// Local file path (e.g., "static/uploads/<id>/uploaded_video.mp4") or a `stub://` URI.
    pub path: String,
}

impl FileConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Local file frame source.
pub struct FileSource {
    backend: FileBackend,
    path: String,
    finished: bool,
}

enum FileBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open the file and prepare its decoder.
    pub fn open(config: FileConfig) -> Result<Self> {
        if !is_local_file_path(&config.path) {
            return Err(anyhow!(
                "file ingestion only supports local paths (no URL schemes)"
            ));
        }
        let backend = if is_synthetic(&config.path) {
            FileBackend::Synthetic(SyntheticSource::parse(
                &config.path,
                Some(DEFAULT_SYNTHETIC_FRAMES),
                0,
            )?)
        } else {
            #[cfg(feature = "ingest-file-ffmpeg")]
            {
                FileBackend::Ffmpeg(FfmpegFileSource::open(&config.path)?)
            }
            #[cfg(not(feature = "ingest-file-ffmpeg"))]
            {
                return Err(anyhow!(
                    "video decoding requires the ingest-file-ffmpeg feature"
                ));
            }
        };
        log::info!("FileSource: opened {}", config.path);
        Ok(Self {
            backend,
            path: config.path,
            finished: false,
        })
    }

    fn read_next(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    /// Get frame statistics.
    pub fn stats(&self) -> FileStats {
        let frames_decoded = match &self.backend {
            FileBackend::Synthetic(source) => source.frame_count(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.frame_count(),
        };
        FileStats {
            frames_decoded,
            path: self.path.clone(),
        }
    }
}

impl FrameSource for FileSource {
    fn describe(&self) -> String {
        format!("file {}", self.path)
    }

    /// A decode failure ends the stream exactly like end-of-file does.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        match self.read_next() {
            Ok(Some(frame)) => Ok(Some(frame)),
            Ok(None) => {
                self.finished = true;
                log::info!("FileSource: end of {}", self.path);
                Ok(None)
            }
            Err(err) => {
                self.finished = true;
                log::warn!("FileSource: decode failed on {}: {:#}", self.path, err);
                Ok(None)
            }
        }
    }
}

impl Drop for FileSource {
    fn drop(&mut self) {
        let stats = self.stats();
        log::debug!(
            "FileSource: released {} after {} frames",
            stats.path,
            stats.frames_decoded
        );
    }
}

/// Statistics for a file source.
#[derive(Clone, Debug)]
pub struct FileStats {
    pub frames_decoded: u64,
    pub path: String,
}

fn is_local_file_path(path: &str) -> bool {
    if path.trim().is_empty() {
        return false;
    }
    if is_synthetic(path) {
        return true;
    }
    !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_clip_yields_exact_frame_count() -> Result<()> {
        let mut source = FileSource::open(FileConfig::new("stub://clip?frames=4&width=32&height=24"))?;
        let mut count = 0;
        while let Some(frame) = source.next_frame()? {
            assert_eq!((frame.width(), frame.height()), (32, 24));
            count += 1;
        }
        assert_eq!(count, 4);
        assert_eq!(source.stats().frames_decoded, 4);
        Ok(())
    }

    #[test]
    fn synthetic_clip_defaults_to_bounded_length() -> Result<()> {
        let mut source = FileSource::open(FileConfig::new("stub://clip?width=8&height=8"))?;
        let mut count = 0;
        while source.next_frame()?.is_some() {
            count += 1;
        }
        assert_eq!(count, DEFAULT_SYNTHETIC_FRAMES);
        Ok(())
    }

    #[test]
    fn file_source_rejects_remote_urls() {
        assert!(FileSource::open(FileConfig::new("rtsp://camera/stream")).is_err());
        assert!(FileSource::open(FileConfig::new("  ")).is_err());
    }

    #[cfg(not(feature = "ingest-file-ffmpeg"))]
    #[test]
    fn real_files_need_a_decoder() {
        let err = FileSource::open(FileConfig::new("/tmp/video.mp4"))
            .err()
            .expect("open must fail without ffmpeg");
        assert!(err.to_string().contains("ingest-file-ffmpeg"));
    }
}
