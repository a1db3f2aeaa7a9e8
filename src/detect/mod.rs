//! Object detection.
//!
//! `Detector` wraps one `DetectorBackend` and applies the confidence
//! threshold and output ordering every backend shares.

mod backend;
mod backends;
mod labels;
mod nms;
mod result;

pub use backend::DetectorBackend;
pub use backends::StubBackend;
#[cfg(feature = "backend-tract")]
pub use backends::TractBackend;
pub use labels::{label_for, COCO_LABELS};
pub use nms::non_max_suppression;
pub use result::{BoundingBox, Detection};

use crate::config::{validate_threshold, BackendKind, ModelConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// A loaded backend plus the confidence threshold applied to its output.
pub struct Detector {
    backend: Box<dyn DetectorBackend>,
    threshold: f32,
}

impl Detector {
    pub fn new(backend: Box<dyn DetectorBackend>, threshold: f32) -> PipelineResult<Self> {
        validate_threshold(threshold)?;
        Ok(Self { backend, threshold })
    }

    /// Load and warm up the backend described by `model`.
    pub fn load(model: &ModelConfig) -> PipelineResult<Self> {
        let mut backend = load_backend(model)?;
        backend.warm_up()?;
        log::info!(
            "detector '{}' ready ({} backend, threshold {:.2})",
            model.name,
            backend.name(),
            model.confidence_threshold
        );
        Self::new(backend, model.confidence_threshold)
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Detections at or above the threshold, highest confidence first
    /// (ties broken by class id).
    pub fn detect(&mut self, frame: &Frame) -> PipelineResult<Vec<Detection>> {
        let mut detections: Vec<Detection> = self
            .backend
            .detect(frame)?
            .into_iter()
            .filter(|d| d.confidence() >= self.threshold)
            .collect();
        detections.sort_by(|a, b| {
            b.confidence()
                .total_cmp(&a.confidence())
                .then(a.class_id().cmp(&b.class_id()))
        });
        log::trace!(
            "frame {} @ {:.3}s: {} detections",
            frame.index(),
            frame.timestamp_secs(),
            detections.len()
        );
        Ok(detections)
    }
}

/// Instantiate the backend named by `model`, failing with `ModelUnavailable`.
pub fn load_backend(model: &ModelConfig) -> PipelineResult<Box<dyn DetectorBackend>> {
    match model.backend {
        BackendKind::Stub => Ok(Box::new(StubBackend::with_labels(model.labels.clone()))),
        BackendKind::Tract => {
            if !model.path.is_file() {
                return Err(PipelineError::ModelUnavailable(format!(
                    "model file {} for '{}' not found",
                    model.path.display(),
                    model.name
                )));
            }
            load_tract(model)
        }
    }
}

#[cfg(feature = "backend-tract")]
fn load_tract(model: &ModelConfig) -> PipelineResult<Box<dyn DetectorBackend>> {
    Ok(Box::new(TractBackend::new(model)?))
}

#[cfg(not(feature = "backend-tract"))]
fn load_tract(model: &ModelConfig) -> PipelineResult<Box<dyn DetectorBackend>> {
    Err(PipelineError::ModelUnavailable(format!(
        "model '{}' needs the tract backend; rebuild with --features backend-tract",
        model.name
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBackend(Vec<Detection>);

    impl DetectorBackend for FixedBackend {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &Frame) -> PipelineResult<Vec<Detection>> {
            Ok(self.0.clone())
        }
    }

    fn det(confidence: f32, class_id: u32) -> Detection {
        let bbox = BoundingBox {
            x: 0.0,
            y: 0.0,
            width: 1.0,
            height: 1.0,
        };
        Detection::new(bbox, confidence, label_for(&[], class_id), class_id).unwrap()
    }

    fn frame() -> Frame {
        Frame::new(0, 0.0, 2, 2, vec![0; 12]).unwrap()
    }

    #[test]
    fn filters_and_orders_by_confidence_then_class() {
        let backend = FixedBackend(vec![det(0.3, 0), det(0.7, 5), det(0.9, 2), det(0.7, 1), det(0.5, 3)]);
        let mut detector = Detector::new(Box::new(backend), 0.5).unwrap();
        let got: Vec<(f32, u32)> = detector
            .detect(&frame())
            .unwrap()
            .iter()
            .map(|d| (d.confidence(), d.class_id()))
            .collect();
        assert_eq!(got, vec![(0.9, 2), (0.7, 1), (0.7, 5), (0.5, 3)]);
    }

    #[test]
    fn zero_detections_is_empty_not_error() {
        let mut detector = Detector::new(Box::new(FixedBackend(Vec::new())), 0.0).unwrap();
        assert!(detector.detect(&frame()).unwrap().is_empty());
    }

    #[test]
    fn threshold_outside_unit_interval_is_config_error() {
        for threshold in [-0.1, 1.1, f32::NAN] {
            let err = Detector::new(Box::new(StubBackend::new()), threshold)
                .err()
                .unwrap();
            assert_eq!(err.kind(), crate::ErrorKind::ConfigError);
        }
    }

    #[test]
    fn missing_model_file_is_model_unavailable() {
        let mut model = ModelConfig::stub(0.5);
        model.backend = BackendKind::Tract;
        model.path = "/nonexistent/yolov8n.onnx".into();
        let err = Detector::load(&model).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::ModelUnavailable);
    }

    #[cfg(not(feature = "backend-tract"))]
    #[test]
    fn tract_model_without_feature_is_model_unavailable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut model = ModelConfig::stub(0.5);
        model.backend = BackendKind::Tract;
        model.path = file.path().to_path_buf();
        let err = Detector::load(&model).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::ModelUnavailable);
    }

    #[cfg(feature = "backend-tract")]
    #[test]
    fn unparsable_model_is_model_unavailable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"not an onnx graph").unwrap();
        let mut model = ModelConfig::stub(0.5);
        model.backend = BackendKind::Tract;
        model.path = file.path().to_path_buf();
        let err = Detector::load(&model).err().unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::ModelUnavailable);
    }

    #[test]
    fn stub_model_loads_without_a_file() {
        let mut detector = Detector::load(&ModelConfig::stub(0.0)).unwrap();
        assert_eq!(detector.backend_name(), "stub");
        let detections = detector.detect(&frame()).unwrap();
        for pair in detections.windows(2) {
            assert!(pair[0].confidence() >= pair[1].confidence());
        }
    }
}
