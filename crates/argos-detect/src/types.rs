//! Core types for the detection pipeline.
//!
//! These types are used internally and serialized to the wire record
//! in the report layer.

/// Axis-aligned bounding box in corner coordinates, pixels of the
/// original image.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Calculate area. Degenerate boxes have zero area.
    pub fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    /// Calculate intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Clamp corners to `[0, width] x [0, height]`, keeping x1 <= x2 and
    /// y1 <= y2.
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        let x1 = self.x1.clamp(0.0, width);
        let y1 = self.y1.clamp(0.0, height);
        let x2 = self.x2.clamp(0.0, width);
        let y2 = self.y2.clamp(0.0, height);
        Self {
            x1: x1.min(x2),
            y1: y1.min(y2),
            x2: x1.max(x2),
            y2: y1.max(y2),
        }
    }

    /// All four corners are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }
}

/// A single detection result.
#[derive(Debug, Clone)]
pub struct Detection {
    /// Class ID (index into the vocabulary)
    pub class_id: u32,
    /// Human-readable class name
    pub class_name: String,
    /// Confidence score 0.0-1.0
    pub confidence: f32,
    /// Bounding box in original-image pixel coordinates
    pub bbox: BoundingBox,
}

/// Model family, identified once from graph metadata at init and frozen
/// for the session's lifetime.
///
/// The family decides preprocessing (letterbox vs direct resize, channel
/// order, normalization) and decoding (grid reconstruction vs transposed
/// class scores vs in-graph decoded rows).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    /// Grid-decoded output with an explicit objectness column; BGR input
    /// in 0..255 (YOLOX export convention).
    YoloX,
    /// Anchor-free output without objectness; RGB input divided by 255
    /// (YOLOv8 export convention).
    YoloV8,
    /// Boxes decoded and suppressed in-graph; takes an auxiliary
    /// scale-factor input (PP-YOLOE export convention).
    PpYoloE,
}

impl std::fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelFamily::YoloX => write!(f, "yolox"),
            ModelFamily::YoloV8 => write!(f, "yolov8"),
            ModelFamily::PpYoloE => write!(f, "pp-yoloe"),
        }
    }
}

/// Final result of one detection call.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    /// Surviving detections in suppression-walk order
    pub detections: Vec<Detection>,
    /// Whole-pipeline wall clock, ingress start to end of suppression
    pub inference_time_ms: u64,
    /// Original-frame width after any input-side rotation
    pub image_width: u32,
    /// Original-frame height after any input-side rotation
    pub image_height: u32,
}

/// Tunables for detector construction.
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    /// Intra-op thread count for the graph runtime
    pub intra_threads: usize,
    /// Inter-op thread count for the graph runtime
    pub inter_threads: usize,
    /// Fallback input width when the graph does not expose fixed dims
    pub input_width: u32,
    /// Fallback input height when the graph does not expose fixed dims
    pub input_height: u32,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            intra_threads: 4,
            inter_threads: 2,
            input_width: 640,
            input_height: 640,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_iou() {
        let box1 = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let box2 = BoundingBox::new(50.0, 50.0, 150.0, 150.0);

        let iou = box1.iou(&box2);
        // Intersection: 50x50 = 2500
        // Union: 100x100 + 100x100 - 2500 = 17500
        assert!((iou - 2500.0 / 17500.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_disjoint_is_zero() {
        let box1 = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let box2 = BoundingBox::new(20.0, 20.0, 30.0, 30.0);
        assert_eq!(box1.iou(&box2), 0.0);
    }

    #[test]
    fn test_iou_identical_is_one() {
        let b = BoundingBox::new(5.0, 5.0, 25.0, 45.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_zero_area_boxes() {
        let a = BoundingBox::new(10.0, 10.0, 10.0, 10.0);
        let b = BoundingBox::new(10.0, 10.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_clamp_orders_corners() {
        let b = BoundingBox::new(-5.0, 700.0, 120.0, -3.0).clamp(100.0, 600.0);
        assert_eq!(b, BoundingBox::new(0.0, 0.0, 100.0, 600.0));
        assert!(b.x1 <= b.x2 && b.y1 <= b.y2);
    }

    #[test]
    fn test_clamp_inside_is_identity() {
        let b = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(b.clamp(100.0, 100.0), b);
    }

    #[test]
    fn test_non_finite_detection() {
        let b = BoundingBox::new(f32::NAN, 0.0, 1.0, 1.0);
        assert!(!b.is_finite());
        let b = BoundingBox::new(0.0, 0.0, f32::INFINITY, 1.0);
        assert!(!b.is_finite());
    }
}
