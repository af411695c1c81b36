//! Live camera source.
//!
//! The configured devices are probed in order and the first one that opens
//! is used for the life of the source. `stub://` devices are unbounded
//! synthetic cameras paced at the configured frame rate; `/dev/video*`
//! nodes need the `ingest-v4l2` feature.

use anyhow::{anyhow, Result};

use super::synthetic::{is_synthetic, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
use super::v4l2::{V4l2Config, V4l2Source};
use super::FrameSource;
use crate::config::CameraSettings;
use crate::frame::Frame;

pub struct CameraSource {
    device: String,
    backend: CameraBackend,
}

enum CameraBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-v4l2")]
    Device(V4l2Source),
}

impl CameraSource {
    /// Open the first device in `settings.devices` that works.
    ///
    /// Fails only when every candidate failed; each failure is logged.
    pub fn probe(settings: &CameraSettings) -> Result<Self> {
        for device in &settings.devices {
            match Self::open(device, settings) {
                Ok(source) => {
                    log::info!("camera found at {}", device);
                    return Ok(source);
                }
                Err(err) => log::debug!("camera {} unavailable: {:#}", device, err),
            }
        }
        log::warn!(
            "no camera available (tried {})",
            settings.devices.join(", ")
        );
        Err(anyhow!("no camera available"))
    }

    /// Open one specific device.
    pub fn open(device: &str, settings: &CameraSettings) -> Result<Self> {
        let backend = if is_synthetic(device) {
            let source = SyntheticSource::parse(device, None, settings.target_fps)?;
            log::debug!("camera {} is synthetic scene '{}'", device, source.name());
            CameraBackend::Synthetic(source)
        } else {
            open_device(device, settings)?
        };
        Ok(Self {
            device: device.to_string(),
            backend,
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn frames_captured(&self) -> u64 {
        match &self.backend {
            CameraBackend::Synthetic(source) => source.frame_count(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.frame_count(),
        }
    }
}

#[cfg(feature = "ingest-v4l2")]
fn open_device(device: &str, settings: &CameraSettings) -> Result<CameraBackend> {
    let source = V4l2Source::open(V4l2Config {
        device: device.to_string(),
        target_fps: settings.target_fps,
        width: settings.width,
        height: settings.height,
    })?;
    Ok(CameraBackend::Device(source))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_device(device: &str, _settings: &CameraSettings) -> Result<CameraBackend> {
    Err(anyhow!(
        "cannot open {}: camera capture requires the ingest-v4l2 feature",
        device
    ))
}

impl FrameSource for CameraSource {
    fn describe(&self) -> String {
        format!("camera {}", self.device)
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            CameraBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-v4l2")]
            CameraBackend::Device(source) => source.next_frame().map(Some),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        log::info!(
            "camera {} released after {} frames",
            self.device,
            self.frames_captured()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(devices: &[&str]) -> CameraSettings {
        CameraSettings {
            devices: devices.iter().map(|d| d.to_string()).collect(),
            target_fps: 0,
            ..CameraSettings::default()
        }
    }

    #[test]
    fn probe_takes_first_working_device() -> Result<()> {
        let camera = CameraSource::probe(&settings(&[
            "/nonexistent/video9",
            "stub://second?width=32&height=24",
            "stub://third",
        ]))?;
        assert_eq!(camera.device(), "stub://second?width=32&height=24");
        Ok(())
    }

    #[test]
    fn probe_fails_when_nothing_opens() {
        assert!(CameraSource::probe(&settings(&["/nonexistent/video0"])).is_err());
        assert!(CameraSource::probe(&settings(&[])).is_err());
    }

    #[test]
    fn synthetic_camera_is_unbounded() -> Result<()> {
        let mut camera = CameraSource::probe(&settings(&["stub://cam?width=16&height=16"]))?;
        for _ in 0..50 {
            assert!(camera.next_frame()?.is_some());
        }
        assert_eq!(camera.frames_captured(), 50);
        Ok(())
    }
}
