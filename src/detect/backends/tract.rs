#![cfg(feature = "backend-tract")]

use std::path::Path;

use image::imageops::FilterType;
use tract_onnx::prelude::*;

use crate::config::ModelConfig;
use crate::detect::backend::DetectorBackend;
use crate::detect::labels::label_for;
use crate::detect::nms::non_max_suppression;
use crate::detect::result::{BoundingBox, Detection};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;

/// Candidates below this score are dropped before NMS.
const CANDIDATE_FLOOR: f32 = 0.01;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a single `[1, 3, S, S]` float input in [0, 1] and a
/// `[1, 4 + classes, anchors]` output (or its transpose) with boxes as
/// centre/size in input pixels. Frames are stretched to `S x S`.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    iou_threshold: f32,
    max_detections: usize,
    labels: Vec<String>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new(config: &ModelConfig) -> PipelineResult<Self> {
        let size = config.input_size as usize;
        let model = load_plan(&config.path, size).map_err(|e| {
            PipelineError::ModelUnavailable(format!(
                "failed to load ONNX model from {}: {:#}",
                config.path.display(),
                e
            ))
        })?;

        Ok(Self {
            model,
            input_size: config.input_size,
            iou_threshold: config.iou_threshold,
            max_detections: config.max_detections,
            labels: config.labels.clone(),
        })
    }

    fn build_input(&self, frame: &Frame) -> PipelineResult<Tensor> {
        let rgb = image::RgbImage::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
            .ok_or_else(|| {
                PipelineError::Internal(format!(
                    "frame buffer does not match {}x{}",
                    frame.width(),
                    frame.height()
                ))
            })?;
        let size = self.input_size;
        let resized = if rgb.width() == size && rgb.height() == size {
            rgb
        } else {
            image::imageops::resize(&rgb, size, size, FilterType::Triangle)
        };

        let size = size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, channel, y, x)| {
            resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> PipelineResult<Vec<Detection>> {
        let output = outputs
            .first()
            .ok_or_else(|| PipelineError::Internal("model produced no outputs".to_string()))?;
        let view = output
            .to_array_view::<f32>()
            .map_err(|e| PipelineError::Internal(format!("model output was not f32: {}", e)))?;
        let shape = view.shape().to_vec();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(PipelineError::Internal(format!(
                "unexpected model output shape {:?}",
                shape
            )));
        }

        // YOLOv8 exports [1, 84, 8400]; some toolchains transpose it.
        let channels_first = shape[1] <= shape[2];
        let (channels, anchors) = if channels_first {
            (shape[1], shape[2])
        } else {
            (shape[2], shape[1])
        };
        if channels <= 4 {
            return Err(PipelineError::Internal(format!(
                "model output has no class scores: {:?}",
                shape
            )));
        }
        let at = |channel: usize, anchor: usize| {
            if channels_first {
                view[[0, channel, anchor]]
            } else {
                view[[0, anchor, channel]]
            }
        };

        let sx = frame.width() as f32 / self.input_size as f32;
        let sy = frame.height() as f32 / self.input_size as f32;
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_idx, score) = (4..channels)
                .map(|c| (c - 4, at(c, anchor)))
                .fold((0, f32::NEG_INFINITY), |best, cur| {
                    if cur.1 > best.1 {
                        cur
                    } else {
                        best
                    }
                });
            if score < CANDIDATE_FLOOR {
                continue;
            }

            let (cx, cy, w, h) = (
                at(0, anchor),
                at(1, anchor),
                at(2, anchor),
                at(3, anchor),
            );
            let x = ((cx - w / 2.0) * sx).max(0.0);
            let y = ((cy - h / 2.0) * sy).max(0.0);
            let bbox = BoundingBox {
                x,
                y,
                width: (w * sx).min(frame.width() as f32 - x).max(0.0),
                height: (h * sy).min(frame.height() as f32 - y).max(0.0),
            };
            let class_id = class_idx as u32;
            if let Some(det) = Detection::new(bbox, score, label_for(&self.labels, class_id), class_id)
            {
                candidates.push(det);
            }
        }

        let mut kept = non_max_suppression(candidates, self.iou_threshold);
        kept.truncate(self.max_detections);
        Ok(kept)
    }
}

fn load_plan(path: &Path, size: usize) -> TractResult<SimplePlan<TypedFact, Box<dyn TypedOp>>> {
    tract_onnx::onnx()
        .model_for_path(path)?
        .with_input_fact(
            0,
            InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size)),
        )?
        .into_optimized()?
        .into_runnable()
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame) -> PipelineResult<Vec<Detection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .map_err(|e| PipelineError::Internal(format!("ONNX inference failed: {}", e)))?;
        self.decode(outputs, frame)
    }

    fn warm_up(&mut self) -> PipelineResult<()> {
        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::<f32>::zeros((1, 3, size, size)).into_tensor();
        self.model
            .run(tvec!(input.into()))
            .map(|_| ())
            .map_err(|e| PipelineError::ModelUnavailable(format!("model warm-up failed: {}", e)))
    }
}
