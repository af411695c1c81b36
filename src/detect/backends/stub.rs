use anyhow::Result;
use image::RgbImage;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};

/// Stub backend for testing. Reports a fixed set of detections, expressed as
/// fractions of the frame so the same script works at any resolution.
pub struct StubBackend {
    script: Vec<Detection>,
}

impl StubBackend {
    /// One `object` box covering the centre quarter of the frame.
    pub fn new() -> Self {
        Self::with_detections(vec![Detection::new(0.25, 0.25, 0.5, 0.5, 0.9, 0, "object")])
    }

    /// Use `script` verbatim; coordinates are fractions in `0..=1`.
    pub fn with_detections(script: Vec<Detection>) -> Self {
        Self { script }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult> {
        let (fw, fh) = (frame.width() as f32, frame.height() as f32);
        let detections = self
            .script
            .iter()
            .map(|d| {
                Detection::new(
                    d.x * fw,
                    d.y * fh,
                    d.w * fw,
                    d.h * fh,
                    d.confidence,
                    d.class_id,
                    d.label.clone(),
                )
            })
            .collect();
        Ok(DetectionResult::new(detections))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stub_scales_script_to_frame() -> Result<()> {
        let mut backend = StubBackend::new();
        let result = backend.detect(&RgbImage::new(200, 100))?;

        assert_eq!(result.len(), 1);
        let d = &result.detections[0];
        assert_eq!((d.x, d.y, d.w, d.h), (50.0, 25.0, 100.0, 50.0));
        Ok(())
    }
}
