/// Result of running detection on a frame.
#[derive(Clone, Debug, Default)]
pub struct DetectionResult {
    /// Detections in source-frame pixel coordinates.
    pub detections: Vec<Detection>,
}

impl DetectionResult {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    /// Highest confidence among all detections, or 0.0 when there are none.
    pub fn max_confidence(&self) -> f32 {
        self.detections
            .iter()
            .map(|d| d.confidence)
            .fold(0.0, f32::max)
    }
}

/// A single bounding box with its class.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Left edge in pixels.
    pub x: f32,
    /// Top edge in pixels.
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub class_id: usize,
    pub label: String,
}

impl Detection {
    pub fn new(
        x: f32,
        y: f32,
        w: f32,
        h: f32,
        confidence: f32,
        class_id: usize,
        label: impl Into<String>,
    ) -> Self {
        Self {
            x,
            y,
            w,
            h,
            confidence,
            class_id,
            label: label.into(),
        }
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.w
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.h
    }

    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    pub fn intersection_area(&self, other: &Detection) -> f32 {
        let l = self.x.max(other.x);
        let r = self.xmax().min(other.xmax());
        let t = self.y.max(other.y);
        let b = self.ymax().min(other.ymax());
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn iou(&self, other: &Detection) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp the box to a `width` x `height` frame.
    pub fn clamped(mut self, width: u32, height: u32) -> Self {
        let (fw, fh) = (width as f32, height as f32);
        let x0 = self.x.clamp(0.0, fw);
        let y0 = self.y.clamp(0.0, fh);
        let x1 = self.xmax().clamp(0.0, fw);
        let y1 = self.ymax().clamp(0.0, fh);
        self.x = x0;
        self.y = y0;
        self.w = x1 - x0;
        self.h = y1 - y0;
        self
    }
}

/// Greedy class-aware non-maximum suppression. Keeps the highest-confidence
/// box of every overlapping group whose IoU exceeds `iou_threshold`.
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = 0;
    for index in 0..detections.len() {
        let suppressed = (0..kept).any(|prev| {
            detections[prev].class_id == detections[index].class_id
                && detections[prev].iou(&detections[index]) > iou_threshold
        });
        if !suppressed {
            detections.swap(kept, index);
            kept += 1;
        }
    }
    detections.truncate(kept);
}
