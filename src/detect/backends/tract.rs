#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::{imageops::FilterType, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::class_label;
use crate::detect::result::{non_max_suppression, Detection, DetectionResult};

/// Letterbox padding value used by the YOLOv8 exporter.
const PAD_VALUE: f32 = 144.0 / 255.0;
const CXYWH_OFFSET: usize = 4;

/// Tract-based backend for YOLOv8 ONNX detection models.
///
/// The model is loaded once from a local file. Each frame is letterboxed to
/// the model's square input, run through the network, and the `[1, 4 + nc, N]`
/// output is decoded into boxes in the original frame's coordinates.
pub struct TractBackend {
    model: TypedRunnableModel<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
        })
    }

    /// Override the default confidence and IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.iou_threshold = iou;
        self
    }

    /// Letterbox `frame` into the model input. Returns the tensor and the
    /// scale ratio from source pixels to model pixels.
    fn build_input(&self, frame: &RgbImage) -> Result<(Tensor, f32)> {
        let (w0, h0) = (frame.width() as f32, frame.height() as f32);
        if w0 == 0.0 || h0 == 0.0 {
            return Err(anyhow!("cannot run detection on an empty frame"));
        }
        let side = self.input_size as f32;
        let ratio = (side / w0).min(side / h0);
        let new_w = ((w0 * ratio).round() as u32).clamp(1, self.input_size);
        let new_h = ((h0 * ratio).round() as u32).clamp(1, self.input_size);
        let resized = image::imageops::resize(frame, new_w, new_h, FilterType::Triangle);

        let side = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            if (x as u32) < new_w && (y as u32) < new_h {
                resized.get_pixel(x as u32, y as u32).0[c] as f32 / 255.0
            } else {
                PAD_VALUE
            }
        });
        Ok((input.into_tensor(), ratio))
    }

    fn decode(&self, outputs: TVec<TValue>, ratio: f32, frame: &RgbImage) -> Result<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let preds = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a rank-3 YOLOv8 output")?;
        let (batch, rows, num_anchors) = preds.dim();
        if batch != 1 || rows <= CXYWH_OFFSET {
            return Err(anyhow!("unexpected YOLOv8 output shape {:?}", preds.dim()));
        }
        let num_classes = rows - CXYWH_OFFSET;

        let mut detections = Vec::new();
        for anchor in 0..num_anchors {
            let mut best = (0usize, f32::NEG_INFINITY);
            for class in 0..num_classes {
                let score = preds[[0, CXYWH_OFFSET + class, anchor]];
                if score > best.1 {
                    best = (class, score);
                }
            }
            let (class_id, confidence) = best;
            if confidence < self.confidence_threshold {
                continue;
            }
            let cx = preds[[0, 0, anchor]] / ratio;
            let cy = preds[[0, 1, anchor]] / ratio;
            let w = preds[[0, 2, anchor]] / ratio;
            let h = preds[[0, 3, anchor]] / ratio;
            detections.push(
                Detection::new(
                    cx - w / 2.0,
                    cy - h / 2.0,
                    w,
                    h,
                    confidence,
                    class_id,
                    class_label(class_id),
                )
                .clamped(frame.width(), frame.height()),
            );
        }

        non_max_suppression(&mut detections, self.iou_threshold);
        Ok(detections)
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult> {
        let (input, ratio) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        Ok(DetectionResult::new(self.decode(outputs, ratio, frame)?))
    }

    fn warm_up(&mut self) -> Result<()> {
        let blank = RgbImage::new(self.input_size, self.input_size);
        self.detect(&blank).map(|_| ())
    }
}
