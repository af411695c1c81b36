//! Per-frame detection and the single-image pipeline.

use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;

use crate::annotate::annotate;
use crate::detect::{run_detection, DetectionResult, SharedDetector};
use crate::stream::encode_jpeg;

/// Run one detection pass over `image` and draw the result onto it.
pub fn annotate_frame(detector: &SharedDetector, image: &mut RgbImage) -> Result<DetectionResult> {
    let result = run_detection(detector, image)?;
    annotate(image, &result);
    Ok(result)
}

/// Outcome of a completed image request.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    pub detections: usize,
    pub max_confidence: f32,
}

/// Detect on the uploaded image at `upload`, write the annotated JPEG to
/// `result`, and delete the upload.
///
/// The upload is removed whether or not processing succeeded.
pub fn run_image_pipeline(
    detector: &SharedDetector,
    upload: &Path,
    result: &Path,
    jpeg_quality: u8,
) -> Result<ImageOutcome> {
    let outcome = process_image(detector, upload, result, jpeg_quality);
    if let Err(err) = std::fs::remove_file(upload) {
        log::warn!("failed to remove upload {}: {}", upload.display(), err);
    }
    outcome
}

fn process_image(
    detector: &SharedDetector,
    upload: &Path,
    result: &Path,
    jpeg_quality: u8,
) -> Result<ImageOutcome> {
    // Uploads keep a fixed name, so sniff the format instead of trusting the extension.
    let mut image = image::ImageReader::open(upload)
        .with_context(|| format!("open uploaded image {}", upload.display()))?
        .with_guessed_format()
        .context("read uploaded image header")?
        .decode()
        .with_context(|| format!("decode uploaded image {}", upload.display()))?
        .to_rgb8();
    let detections = annotate_frame(detector, &mut image)?;

    let jpeg = encode_jpeg(&image, jpeg_quality)?;
    if let Some(parent) = result.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create result dir {}", parent.display()))?;
    }
    std::fs::write(result, jpeg)
        .with_context(|| format!("write result image {}", result.display()))?;

    log::debug!(
        "image {}x{}: {} detections -> {}",
        image.width(),
        image.height(),
        detections.len(),
        result.display()
    );
    Ok(ImageOutcome {
        detections: detections.len(),
        max_confidence: detections.max_confidence(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BackendRegistry, CpuBackend};
    use image::Rgb;

    fn cpu_detector() -> SharedDetector {
        let mut registry = BackendRegistry::new();
        registry.register(CpuBackend::new());
        registry.default_backend().expect("cpu backend")
    }

    #[test]
    fn pipeline_writes_result_and_removes_upload() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("uploaded_image.png");
        let result = dir.path().join("results/abc/result_image.jpg");

        let mut input = RgbImage::from_pixel(160, 120, Rgb([20, 20, 20]));
        for y in 32..72 {
            for x in 40..80 {
                input.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        input.save(&upload)?;

        let outcome = run_image_pipeline(&cpu_detector(), &upload, &result, 85)?;

        assert!(!upload.exists());
        assert!(result.exists());
        assert_eq!(outcome.detections, 1);
        assert!(outcome.max_confidence > 0.0);
        let written = image::open(&result)?;
        assert_eq!((written.width(), written.height()), (160, 120));
        Ok(())
    }

    #[test]
    fn undecodable_upload_is_still_removed() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let upload = dir.path().join("uploaded_image.jpg");
        let result = dir.path().join("result_image.jpg");
        std::fs::write(&upload, b"definitely not an image")?;

        assert!(run_image_pipeline(&cpu_detector(), &upload, &result, 85).is_err());
        assert!(!upload.exists());
        assert!(!result.exists());
        Ok(())
    }
}
