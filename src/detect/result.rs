use serde::Serialize;

/// Axis-aligned box in frame pixel coordinates, origin at the top-left.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Intersection over union, 0.0 for disjoint or degenerate boxes.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = (self.x + self.width).min(other.x + other.width);
        let y2 = (self.y + self.height).min(other.y + other.height);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;
        if union <= 0.0 {
            0.0
        } else {
            intersection / union
        }
    }

    fn is_valid(&self) -> bool {
        [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite())
            && self.width >= 0.0
            && self.height >= 0.0
    }
}

/// One model prediction on one frame. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    bbox: BoundingBox,
    confidence: f32,
    label: String,
    class_id: u32,
}

impl Detection {
    /// `None` for non-finite values or negative extents. Confidence is
    /// clamped into [0, 1].
    pub fn new(
        bbox: BoundingBox,
        confidence: f32,
        label: impl Into<String>,
        class_id: u32,
    ) -> Option<Self> {
        if !confidence.is_finite() || !bbox.is_valid() {
            return None;
        }
        Some(Self {
            bbox,
            confidence: confidence.clamp(0.0, 1.0),
            label: label.into(),
            class_id,
        })
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
        }
    }

    #[test]
    fn rejects_invalid_values_and_clamps_confidence() {
        assert!(Detection::new(bbox(0.0, 0.0, 1.0, 1.0), f32::NAN, "person", 0).is_none());
        assert!(Detection::new(bbox(0.0, 0.0, -1.0, 1.0), 0.5, "person", 0).is_none());
        assert!(Detection::new(bbox(f32::INFINITY, 0.0, 1.0, 1.0), 0.5, "person", 0).is_none());

        let det = Detection::new(bbox(1.0, 2.0, 3.0, 4.0), 1.7, "car", 2).unwrap();
        assert_eq!(det.confidence(), 1.0);
        assert_eq!(det.label(), "car");
        assert_eq!(det.class_id(), 2);
    }

    #[test]
    fn iou_of_overlapping_boxes() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&bbox(20.0, 20.0, 1.0, 1.0)), 0.0);
        assert_eq!(a.iou(&bbox(0.0, 0.0, 0.0, 0.0)), 0.0);
    }

    #[test]
    fn serializes_with_nested_box() {
        let det = Detection::new(bbox(1.0, 2.0, 3.0, 4.0), 0.5, "dog", 16).unwrap();
        let value = serde_json::to_value(&det).unwrap();
        assert_eq!(value["bbox"]["width"], 3.0);
        assert_eq!(value["label"], "dog");
        assert_eq!(value["class_id"], 16);
    }
}
