//! Synthetic `stub://` sources.
//!
//! `stub://<name>?frames=N&width=W&height=H&fps=F` produces a generated
//! scene: a dark gradient with one bright square sliding across it. `frames`
//! bounds the clip; without it the source is unbounded. `fps` paces
//! production in wall-clock time.

use anyhow::{anyhow, Context, Result};
use image::{Rgb, RgbImage};
use std::time::{Duration, Instant};
use url::Url;

use crate::frame::Frame;

pub(crate) const SCHEME: &str = "stub";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const MAX_SIDE: u32 = 4096;

pub(crate) fn is_synthetic(uri: &str) -> bool {
    uri.starts_with("stub://")
}

pub(crate) struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    limit: Option<u64>,
    frame_interval: Option<Duration>,
    frame_count: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    /// Parse a `stub://` URI. `default_limit` applies when `frames` is absent
    /// and `default_fps` when `fps` is absent (`0` disables pacing).
    pub(crate) fn parse(uri: &str, default_limit: Option<u64>, default_fps: u32) -> Result<Self> {
        let url = Url::parse(uri).with_context(|| format!("invalid synthetic source '{}'", uri))?;
        if url.scheme() != SCHEME {
            return Err(anyhow!("'{}' is not a {}:// source", uri, SCHEME));
        }

        let mut width = DEFAULT_WIDTH;
        let mut height = DEFAULT_HEIGHT;
        let mut limit = default_limit;
        let mut fps = default_fps;
        for (key, value) in url.query_pairs() {
            let parse_u32 = || {
                value
                    .parse::<u32>()
                    .map_err(|_| anyhow!("synthetic source '{}': {} must be an integer", uri, key))
            };
            match key.as_ref() {
                "width" => width = parse_u32()?,
                "height" => height = parse_u32()?,
                "fps" => fps = parse_u32()?,
                "frames" => limit = Some(parse_u32()? as u64),
                other => log::debug!("synthetic source '{}': ignoring '{}'", uri, other),
            }
        }
        if width == 0 || height == 0 || width > MAX_SIDE || height > MAX_SIDE {
            return Err(anyhow!(
                "synthetic source '{}': size {}x{} out of range",
                uri,
                width,
                height
            ));
        }

        Ok(Self {
            name: url.host_str().unwrap_or("synthetic").to_string(),
            width,
            height,
            limit,
            frame_interval: (fps > 0).then(|| Duration::from_secs_f64(1.0 / fps as f64)),
            frame_count: 0,
            last_frame_at: None,
        })
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub(crate) fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.limit.is_some_and(|limit| self.frame_count >= limit) {
            return Ok(None);
        }
        self.pace();

        let frame = Frame::new(self.render(), self.frame_count);
        self.frame_count += 1;
        self.last_frame_at = Some(Instant::now());
        Ok(Some(frame))
    }

    fn pace(&self) {
        if let (Some(interval), Some(last)) = (self.frame_interval, self.last_frame_at) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
    }

    fn render(&self) -> RgbImage {
        let side = (self.width.min(self.height) / 4).max(1);
        let travel = (self.width - side).max(1) as u64;
        let x0 = ((self.frame_count * 8) % travel) as u32;
        let y0 = (self.height - side) / 2;
        RgbImage::from_fn(self.width, self.height, |x, y| {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                Rgb([240, 240, 240])
            } else {
                let shade = (y * 40 / self.height) as u8;
                Rgb([shade, shade, 20 + shade])
            }
        })
    }
}
