//! Multipart MJPEG streaming.
//!
//! Every annotated frame is JPEG encoded and framed as one part of a
//! `multipart/x-mixed-replace` body:
//!
//! ```text
//! --frame\r\n
//! Content-Type: image/jpeg\r\n
//! \r\n
//! <jpeg bytes>\r\n
//! ```
//!
//! Frames are produced on a blocking task and handed to the HTTP body
//! through a bounded channel. A slow client fills the channel and stalls the
//! producer; a disconnected client closes it, which ends the producer loop
//! and drops the frame source.

use std::io;

use anyhow::{Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::StreamSettings;
use crate::detect::SharedDetector;
use crate::ingest::FrameSource;
use crate::pipeline::annotate_frame;

pub const BOUNDARY: &str = "frame";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

/// Body of a streaming response.
pub type ChunkStream = ReceiverStream<std::result::Result<Bytes, io::Error>>;

/// Encode `image` as a baseline JPEG.
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(image.as_raw().len() / 8);
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .context("encode JPEG")?;
    Ok(out)
}

/// Wrap one JPEG in its multipart framing.
pub fn multipart_chunk(jpeg: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
    buf.put_slice(PART_HEADER);
    buf.put_slice(jpeg);
    buf.put_slice(PART_TRAILER);
    buf.freeze()
}

/// A started stream: whether its source opened, and the chunk body.
pub struct AnnotatedStream {
    /// `describe()` of the opened source, or `None` when it failed to open.
    pub source: Option<String>,
    pub body: ChunkStream,
}

impl AnnotatedStream {
    pub fn is_available(&self) -> bool {
        self.source.is_some()
    }
}

/// Open a frame source on a blocking task and stream annotated frames from it.
///
/// `open` runs on the blocking task, so the source itself never crosses
/// threads. This returns once the open attempt has finished; when it failed
/// the body ends without yielding a chunk.
pub async fn start_annotated_stream<S, F>(
    open: F,
    detector: SharedDetector,
    settings: StreamSettings,
) -> AnnotatedStream
where
    S: FrameSource,
    F: FnOnce() -> Result<S> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(settings.buffer_frames.max(1));
    let (status_tx, status_rx) = oneshot::channel();

    tokio::task::spawn_blocking(move || {
        let source = match open() {
            Ok(source) => {
                let _ = status_tx.send(Some(source.describe()));
                source
            }
            Err(err) => {
                log::warn!("frame source unavailable: {:#}", err);
                let _ = status_tx.send(None);
                return;
            }
        };
        produce(source, &detector, settings.jpeg_quality, &tx);
    });

    let source = status_rx.await.unwrap_or(None);
    AnnotatedStream {
        source,
        body: ReceiverStream::new(rx),
    }
}

fn produce<S: FrameSource>(
    mut source: S,
    detector: &SharedDetector,
    quality: u8,
    tx: &mpsc::Sender<std::result::Result<Bytes, io::Error>>,
) {
    let name = source.describe();
    let mut sent = 0u64;
    loop {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(err) => {
                log::warn!("{}: capture failed: {:#}", name, err);
                break;
            }
        };

        let mut image = frame.into_image();
        let chunk = annotate_frame(detector, &mut image)
            .and_then(|_| encode_jpeg(&image, quality))
            .map(|jpeg| multipart_chunk(&jpeg));
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                log::warn!("{}: frame {} dropped from stream: {:#}", name, sent, err);
                break;
            }
        };

        if tx.blocking_send(Ok(chunk)).is_err() {
            log::debug!("{}: client disconnected after {} frames", name, sent);
            return;
        }
        sent += 1;
    }
    log::info!("{}: stream finished after {} frames", name, sent);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BackendRegistry, StubBackend};
    use crate::frame::Frame;
    use futures::StreamExt;

    struct Countdown {
        remaining: u32,
        produced: std::sync::Arc<std::sync::atomic::AtomicU32>,
    }

    impl FrameSource for Countdown {
        fn describe(&self) -> String {
            "countdown".to_string()
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            if self.remaining == 0 {
                return Ok(None);
            }
            self.remaining -= 1;
            self.produced
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(Some(Frame::new(RgbImage::new(24, 16), 0)))
        }
    }

    fn detector() -> SharedDetector {
        let mut registry = BackendRegistry::new();
        registry.register(StubBackend::new());
        registry.default_backend().expect("stub backend")
    }

    #[test]
    fn chunk_has_multipart_framing() {
        let chunk = multipart_chunk(b"JPEG");
        assert_eq!(
            &chunk[..],
            b"--frame\r\nContent-Type: image/jpeg\r\n\r\nJPEG\r\n"
        );
    }

    #[test]
    fn encoded_jpeg_round_trips_dimensions() -> Result<()> {
        let jpeg = encode_jpeg(&RgbImage::new(33, 17), 80)?;
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        let decoded = image::load_from_memory(&jpeg)?;
        assert_eq!((decoded.width(), decoded.height()), (33, 17));
        Ok(())
    }

    #[tokio::test]
    async fn finite_source_yields_one_chunk_per_frame() {
        let produced = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let source = Countdown {
            remaining: 5,
            produced: produced.clone(),
        };
        let stream =
            start_annotated_stream(move || Ok(source), detector(), StreamSettings::default())
                .await;
        assert_eq!(stream.source.as_deref(), Some("countdown"));

        let chunks: Vec<_> = stream.body.collect().await;
        assert_eq!(chunks.len(), 5);
        for chunk in chunks {
            let chunk = chunk.expect("chunk");
            assert!(chunk.starts_with(PART_HEADER));
            assert!(chunk.ends_with(b"\xFF\xD9\r\n"));
        }
    }

    #[tokio::test]
    async fn failed_open_yields_empty_body() {
        let stream = start_annotated_stream(
            || -> Result<Countdown> { Err(anyhow::anyhow!("no device")) },
            detector(),
            StreamSettings::default(),
        )
        .await;
        assert!(!stream.is_available());
        assert_eq!(stream.body.collect::<Vec<_>>().await.len(), 0);
    }

    #[tokio::test]
    async fn dropped_body_stops_production() {
        let produced = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let source = Countdown {
            remaining: u32::MAX,
            produced: produced.clone(),
        };
        let settings = StreamSettings {
            buffer_frames: 1,
            ..StreamSettings::default()
        };
        let mut stream = start_annotated_stream(move || Ok(source), detector(), settings).await;
        assert!(stream.body.next().await.is_some());
        drop(stream);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let settled = produced.load(std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert_eq!(produced.load(std::sync::atomic::Ordering::SeqCst), settled);
        assert!(settled < 10);
    }
}
