use std::collections::HashMap;

use anyhow::Result;
use image::{GrayImage, Luma, RgbImage};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{Detection, DetectionResult};

const DEFAULT_CELL_SIZE: u32 = 8;
const DEFAULT_LUMA_DELTA: u8 = 48;
const DEFAULT_MIN_CELLS: u32 = 4;
const MAX_DETECTIONS: usize = 32;

/// CPU backend for model-free foreground detection.
///
/// Pixels whose luma differs from the frame mean by more than `luma_delta`
/// are foreground. The foreground mask is pooled into square cells, touching
/// cells are grouped, and every group of at least `min_cells` cells becomes
/// one `object` box. Stateless, so a single instance can serve any number of
/// streams.
pub struct CpuBackend {
    cell_size: u32,
    luma_delta: u8,
    min_cells: u32,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self {
            cell_size: DEFAULT_CELL_SIZE,
            luma_delta: DEFAULT_LUMA_DELTA,
            min_cells: DEFAULT_MIN_CELLS,
        }
    }

    fn foreground_cells(&self, gray: &GrayImage) -> GrayImage {
        let mean = mean_luma(gray);
        let cell = self.cell_size;
        let grid_w = gray.width().div_ceil(cell);
        let grid_h = gray.height().div_ceil(cell);
        let mut counts = vec![(0u32, 0u32); (grid_w * grid_h) as usize];

        for (x, y, px) in gray.enumerate_pixels() {
            let idx = ((y / cell) * grid_w + x / cell) as usize;
            counts[idx].1 += 1;
            if px.0[0].abs_diff(mean) > self.luma_delta {
                counts[idx].0 += 1;
            }
        }

        GrayImage::from_fn(grid_w, grid_h, |gx, gy| {
            let (fg, total) = counts[(gy * grid_w + gx) as usize];
            if total > 0 && fg * 2 >= total {
                Luma([255])
            } else {
                Luma([0])
            }
        })
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &RgbImage) -> Result<DetectionResult> {
        if frame.width() == 0 || frame.height() == 0 {
            return Ok(DetectionResult::default());
        }
        let gray = image::imageops::grayscale(frame);
        let mask = self.foreground_cells(&gray);
        let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

        // label -> (min_x, min_y, max_x, max_y, cells)
        let mut groups: HashMap<u32, (u32, u32, u32, u32, u32)> = HashMap::new();
        for (x, y, label) in labels.enumerate_pixels() {
            let label = label.0[0];
            if label == 0 {
                continue;
            }
            let entry = groups.entry(label).or_insert((x, y, x, y, 0));
            entry.0 = entry.0.min(x);
            entry.1 = entry.1.min(y);
            entry.2 = entry.2.max(x);
            entry.3 = entry.3.max(y);
            entry.4 += 1;
        }

        let cell = self.cell_size as f32;
        let mut detections: Vec<Detection> = groups
            .into_values()
            .filter(|g| g.4 >= self.min_cells)
            .map(|(x0, y0, x1, y1, cells)| {
                let span = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f32;
                Detection::new(
                    x0 as f32 * cell,
                    y0 as f32 * cell,
                    (x1 - x0 + 1) as f32 * cell,
                    (y1 - y0 + 1) as f32 * cell,
                    (cells as f32 / span).min(1.0),
                    0,
                    "object",
                )
                .clamped(frame.width(), frame.height())
            })
            .collect();

        detections.sort_by(|a, b| b.area().total_cmp(&a.area()));
        detections.truncate(MAX_DETECTIONS);
        Ok(DetectionResult::new(detections))
    }
}

fn mean_luma(gray: &GrayImage) -> u8 {
    let total: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    let count = (gray.width() as u64 * gray.height() as u64).max(1);
    (total / count) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame_with_square(x0: u32, y0: u32, side: u32) -> RgbImage {
        RgbImage::from_fn(160, 120, |x, y| {
            if (x0..x0 + side).contains(&x) && (y0..y0 + side).contains(&y) {
                Rgb([250, 250, 250])
            } else {
                Rgb([10, 10, 10])
            }
        })
    }

    #[test]
    fn cpu_backend_boxes_bright_square() -> Result<()> {
        let mut backend = CpuBackend::new();
        let result = backend.detect(&frame_with_square(40, 32, 40))?;

        assert_eq!(result.len(), 1);
        let d = &result.detections[0];
        assert_eq!(d.label, "object");
        assert_eq!((d.x, d.y, d.w, d.h), (40.0, 32.0, 40.0, 40.0));
        assert!(d.confidence > 0.99);
        Ok(())
    }

    #[test]
    fn cpu_backend_ignores_uniform_frame() -> Result<()> {
        let mut backend = CpuBackend::new();
        let result = backend.detect(&RgbImage::from_pixel(64, 64, Rgb([90, 90, 90])))?;
        assert!(result.is_empty());
        Ok(())
    }

    #[test]
    fn cpu_backend_drops_specks_below_min_cells() -> Result<()> {
        let mut backend = CpuBackend::new();
        // 8x8 square covers a single cell
        let result = backend.detect(&frame_with_square(16, 16, 8))?;
        assert!(result.is_empty());
        Ok(())
    }
}
