use sha2::{Digest, Sha256};

use crate::detect::backend::DetectorBackend;
use crate::detect::labels::label_for;
use crate::detect::result::{BoundingBox, Detection};
use crate::error::PipelineResult;
use crate::frame::Frame;

const MAX_STUB_DETECTIONS: usize = 3;
/// Digest bytes consumed per pseudo-detection.
const BYTES_PER_DETECTION: usize = 6;

/// Stub backend for testing and dry runs. Derives 0 to 3 boxes from a
/// SHA-256 of the pixel buffer, so equal frames give equal detections.
pub struct StubBackend {
    labels: Vec<String>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self { labels: Vec::new() }
    }

    pub fn with_labels(labels: Vec<String>) -> Self {
        Self { labels }
    }

    fn class_count(&self) -> u32 {
        if self.labels.is_empty() {
            crate::detect::labels::COCO_LABELS.len() as u32
        } else {
            self.labels.len() as u32
        }
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

    fn detect(&mut self, frame: &Frame) -> PipelineResult<Vec<Detection>> {
        let digest: [u8; 32] = Sha256::digest(frame.pixels()).into();
        let count = digest[0] as usize % (MAX_STUB_DETECTIONS + 1);
        let width = frame.width() as f32;
        let height = frame.height() as f32;
        let unit = |b: u8| b as f32 / 255.0;

        let detections = digest[1..]
            .chunks_exact(BYTES_PER_DETECTION)
            .take(count)
            .filter_map(|b| {
                let class_id = b[0] as u32 % self.class_count();
                let x = unit(b[2]) * width * 0.75;
                let y = unit(b[3]) * height * 0.75;
                let bbox = BoundingBox {
                    x,
                    y,
                    width: ((0.1 + unit(b[4]) * 0.25) * width).min(width - x),
                    height: ((0.1 + unit(b[5]) * 0.25) * height).min(height - y),
                };
                Detection::new(bbox, unit(b[1]), label_for(&self.labels, class_id), class_id)
            })
            .collect();
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(seed: u8) -> Frame {
        let pixels = (0..16 * 8 * 3).map(|i| (i as u8).wrapping_mul(seed)).collect();
        Frame::new(0, 0.0, 16, 8, pixels).unwrap()
    }

    #[test]
    fn deterministic_and_inside_the_frame() {
        let mut backend = StubBackend::new();
        let mut total = 0;
        for seed in 0..32u8 {
            let first = backend.detect(&frame(seed)).unwrap();
            assert_eq!(first, backend.detect(&frame(seed)).unwrap());
            assert!(first.len() <= MAX_STUB_DETECTIONS);
            for det in &first {
                let b = det.bbox();
                assert!(b.x >= 0.0 && b.y >= 0.0);
                assert!(b.x + b.width <= 16.0 + 1e-4);
                assert!(b.y + b.height <= 8.0 + 1e-4);
                assert!((0.0..=1.0).contains(&det.confidence()));
                assert!(det.class_id() < 80);
            }
            total += first.len();
        }
        assert!(total > 0);
    }

    #[test]
    fn custom_labels_bound_the_class_ids() {
        let mut backend = StubBackend::with_labels(vec!["only".to_string()]);
        for seed in 0..16u8 {
            for det in backend.detect(&frame(seed)).unwrap() {
                assert_eq!(det.class_id(), 0);
                assert_eq!(det.label(), "only");
            }
        }
    }
}
