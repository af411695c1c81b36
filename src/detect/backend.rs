use anyhow::Result;
use image::RgbImage;

use crate::detect::result::DetectionResult;

/// Detector backend trait.
///
/// A backend receives one decoded RGB frame and returns detections in that
/// frame's pixel coordinates. Drawing is not the backend's job; the
/// annotator overlays the result afterwards.
///
/// `detect` is blocking and may be slow. Callers run it off the async
/// executor and serialise access through the registry's `Mutex`.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult>;

    /// Optional warm-up hook, run once before the server accepts requests.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
