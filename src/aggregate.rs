//! Per-video result accumulation.

use serde::Serialize;
use std::cmp::Ordering;

use crate::detect::Detection;
use crate::error::{ErrorKind, PipelineError};
use crate::video::{VideoMetadata, VideoReference};

/// Detections found on one sampled frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameDetections {
    pub timestamp_secs: f64,
    pub frame_index: u64,
    pub detections: Vec<Detection>,
}

/// Terminal state of one video.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum VideoStatus {
    Succeeded,
    Failed { kind: ErrorKind, message: String },
}

/// Everything the pipeline learned about one video.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VideoResult {
    pub reference: VideoReference,
    /// Sampled frames in strictly increasing timestamp order.
    pub frames: Vec<FrameDetections>,
    pub status: VideoStatus,
}

impl VideoResult {
    /// A result that failed before any frame was processed.
    pub fn failed(reference: VideoReference, error: &PipelineError) -> Self {
        let mut aggregator = ResultAggregator::new(reference);
        aggregator.fail(error);
        aggregator.finish()
    }

    pub fn is_success(&self) -> bool {
        self.status == VideoStatus::Succeeded
    }

    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match &self.status {
            VideoStatus::Succeeded => None,
            VideoStatus::Failed { kind, .. } => Some(*kind),
        }
    }

    pub fn detection_count(&self) -> usize {
        self.frames.iter().map(|f| f.detections.len()).sum()
    }
}

/// Builds a `VideoResult` frame by frame.
///
/// The first failure is sticky: it fixes the status and every later
/// `record` is refused.
pub struct ResultAggregator {
    reference: VideoReference,
    frames: Vec<FrameDetections>,
    failure: Option<PipelineError>,
}

impl ResultAggregator {
    pub fn new(reference: VideoReference) -> Self {
        Self {
            reference,
            frames: Vec::new(),
            failure: None,
        }
    }

    /// Resolve the reference with source metadata. Later calls are ignored.
    pub fn attach_metadata(&mut self, metadata: VideoMetadata) {
        if !self.reference.is_resolved() {
            self.reference = self.reference.clone().resolve(metadata);
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Record one sampled frame. Returns `false` when the input is refused.
    pub fn record(
        &mut self,
        timestamp_secs: f64,
        frame_index: u64,
        detections: Vec<Detection>,
    ) -> bool {
        if self.failure.is_some() {
            return false;
        }
        if let Some(last) = self.frames.last().map(|f| f.timestamp_secs) {
            if timestamp_secs.partial_cmp(&last) != Some(Ordering::Greater) {
                self.fail(&PipelineError::Internal(format!(
                    "frame timestamp {:.3}s does not follow {:.3}s",
                    timestamp_secs, last
                )));
                return false;
            }
        }
        self.frames.push(FrameDetections {
            timestamp_secs,
            frame_index,
            detections,
        });
        true
    }

    /// Mark the video failed. Only the first call has an effect.
    pub fn fail(&mut self, error: &PipelineError) {
        if self.failure.is_none() {
            self.failure = Some(error.clone());
        }
    }

    pub fn finish(self) -> VideoResult {
        let status = match self.failure {
            None => VideoStatus::Succeeded,
            Some(error) => VideoStatus::Failed {
                kind: error.kind(),
                message: error.message(),
            },
        };
        VideoResult {
            reference: self.reference,
            frames: self.frames,
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reference() -> VideoReference {
        VideoReference::parse("stub://clip").unwrap()
    }

    #[test]
    fn records_frames_in_order() {
        let mut agg = ResultAggregator::new(reference());
        assert!(agg.record(0.0, 0, Vec::new()));
        assert!(agg.record(30.0, 900, Vec::new()));
        let result = agg.finish();
        assert!(result.is_success());
        assert_eq!(result.frames.len(), 2);
        assert_eq!(result.failure_kind(), None);
    }

    #[test]
    fn first_failure_wins_and_stops_input() {
        let mut agg = ResultAggregator::new(reference());
        assert!(agg.record(0.0, 0, Vec::new()));
        agg.fail(&PipelineError::DecodeError("bad packet".to_string()));
        agg.fail(&PipelineError::Cancelled);
        assert!(!agg.record(1.0, 30, Vec::new()));

        let result = agg.finish();
        assert_eq!(result.frames.len(), 1);
        assert_eq!(
            result.status,
            VideoStatus::Failed {
                kind: ErrorKind::DecodeError,
                message: "bad packet".to_string()
            }
        );
    }

    #[test]
    fn non_increasing_timestamp_fails_the_result() {
        let mut agg = ResultAggregator::new(reference());
        assert!(agg.record(5.0, 150, Vec::new()));
        assert!(!agg.record(5.0, 151, Vec::new()));
        let result = agg.finish();
        assert_eq!(result.failure_kind(), Some(ErrorKind::Internal));
        assert_eq!(result.frames.len(), 1);
    }

    #[test]
    fn metadata_is_attached_once() {
        let meta = VideoMetadata {
            duration_secs: 10.0,
            fps: 30.0,
            width: 64,
            height: 48,
        };
        let mut agg = ResultAggregator::new(reference());
        agg.attach_metadata(meta.clone());
        agg.attach_metadata(VideoMetadata { fps: 1.0, ..meta.clone() });
        assert_eq!(agg.finish().reference.metadata(), Some(&meta));
    }

    #[test]
    fn status_serializes_as_tagged_union() {
        let result = VideoResult::failed(
            reference(),
            &PipelineError::SourceUnavailable("HTTP 404".to_string()),
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"]["state"], "failed");
        assert_eq!(value["status"]["kind"], "source_unavailable");
        assert_eq!(value["status"]["message"], "HTTP 404");
        let ok = serde_json::to_value(VideoStatus::Succeeded).unwrap();
        assert_eq!(ok["state"], "succeeded");
    }
}
