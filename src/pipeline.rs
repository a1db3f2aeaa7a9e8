//! Video processing pipeline.
//!
//! One video runs sequentially: load detector, open source, sample
//! keyframes, detect, record. Videos are independent; a failure in one
//! never touches another.

use rayon::prelude::*;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use crate::aggregate::{ResultAggregator, VideoResult, VideoStatus};
use crate::cancel::CancelToken;
use crate::config::{validate_interval, AutovisionConfig, ModelConfig, SourceSettings};
use crate::detect::Detector;
use crate::error::{PipelineError, PipelineResult};
use crate::ingest::open_source;
use crate::sampler::FrameSampler;
use crate::video::VideoReference;

/// Read-only settings shared by every video.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub keyframe_interval_secs: f64,
    pub source: SourceSettings,
    pub model: ModelConfig,
    pub workers: usize,
}

impl PipelineSettings {
    /// Settings for the configured primary model.
    pub fn from_config(config: &AutovisionConfig) -> PipelineResult<Self> {
        Ok(Self {
            keyframe_interval_secs: config.keyframe_interval_secs,
            source: config.source.clone(),
            model: config.primary_model()?.clone(),
            workers: config.workers,
        })
    }

    /// Same as `from_config` but with an explicit model.
    pub fn with_model(config: &AutovisionConfig, model: ModelConfig) -> Self {
        Self {
            keyframe_interval_secs: config.keyframe_interval_secs,
            source: config.source.clone(),
            model,
            workers: config.workers,
        }
    }
}

pub struct Pipeline {
    settings: Arc<PipelineSettings>,
    cancel: CancelToken,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings) -> PipelineResult<Self> {
        validate_interval(settings.keyframe_interval_secs)?;
        if settings.workers == 0 {
            return Err(PipelineError::ConfigError(
                "workers must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            settings: Arc::new(settings),
            cancel: CancelToken::new(),
        })
    }

    /// Share an external cancellation token (e.g. a Ctrl-C handler).
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Process one video. Never fails: errors and panics become a failed
    /// result.
    pub fn process(&self, reference: &VideoReference) -> VideoResult {
        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.run(reference)))
            .unwrap_or_else(|payload| {
                VideoResult::failed(
                    reference.clone(),
                    &PipelineError::Internal(format!(
                        "panic while processing: {}",
                        panic_message(payload.as_ref())
                    )),
                )
            });

        match &result.status {
            VideoStatus::Succeeded => log::info!(
                "{}: {} keyframes, {} detections in {:.2}s",
                reference,
                result.frames.len(),
                result.detection_count(),
                started.elapsed().as_secs_f64()
            ),
            VideoStatus::Failed { kind, message } => log::error!(
                "{}: failed with {} after {} keyframes: {}",
                reference,
                kind,
                result.frames.len(),
                message
            ),
        }
        result
    }

    /// Process videos on a pool of `workers` threads. Results keep input
    /// order.
    pub fn process_all(&self, references: &[VideoReference]) -> Vec<VideoResult> {
        self.process_all_with(references, &|_| {})
    }

    /// `process_all`, calling `on_done` from the worker as each video ends.
    pub fn process_all_with(
        &self,
        references: &[VideoReference],
        on_done: &(dyn Fn(&VideoResult) + Sync),
    ) -> Vec<VideoResult> {
        let run = |reference: &VideoReference| {
            let result = self.process(reference);
            on_done(&result);
            result
        };
        let threads = self.settings.workers.min(references.len()).max(1);
        match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
            Ok(pool) => pool.install(|| references.par_iter().map(run).collect()),
            Err(e) => {
                log::warn!("worker pool unavailable ({}); processing sequentially", e);
                references.iter().map(run).collect()
            }
        }
    }

    /// Parse and process raw locators. Unparsable locators become failed
    /// results in place.
    pub fn process_locators(&self, locators: &[String]) -> Vec<VideoResult> {
        self.process_locators_with(locators, &|_| {})
    }

    pub fn process_locators_with(
        &self,
        locators: &[String],
        on_done: &(dyn Fn(&VideoResult) + Sync),
    ) -> Vec<VideoResult> {
        let parsed: Vec<PipelineResult<VideoReference>> =
            locators.iter().map(|l| VideoReference::parse(l)).collect();
        let valid: Vec<VideoReference> = parsed
            .iter()
            .filter_map(|p| p.as_ref().ok().cloned())
            .collect();
        let mut processed = self.process_all_with(&valid, on_done).into_iter();

        locators
            .iter()
            .zip(parsed)
            .map(|(locator, parsed)| match parsed {
                Ok(_) => processed.next().unwrap_or_else(|| {
                    VideoResult::failed(
                        VideoReference::unparsed(locator),
                        &PipelineError::Internal("missing result".to_string()),
                    )
                }),
                Err(e) => {
                    log::error!("{}: {}", locator, e);
                    let result = VideoResult::failed(VideoReference::unparsed(locator), &e);
                    on_done(&result);
                    result
                }
            })
            .collect()
    }

    fn run(&self, reference: &VideoReference) -> VideoResult {
        let mut aggregator = ResultAggregator::new(reference.clone());
        if let Err(e) = self.run_stages(reference, &mut aggregator) {
            aggregator.fail(&e);
        }
        aggregator.finish()
    }

    fn run_stages(
        &self,
        reference: &VideoReference,
        aggregator: &mut ResultAggregator,
    ) -> PipelineResult<()> {
        self.cancel.check()?;
        let mut detector = Detector::load(&self.settings.model)?;
        let opened = open_source(reference, &self.settings.source, &self.cancel)?;
        if let Some(metadata) = opened.reference.metadata() {
            aggregator.attach_metadata(metadata.clone());
        }

        let sampler = FrameSampler::new(
            opened.source,
            self.settings.keyframe_interval_secs,
            self.cancel.clone(),
        )?;
        for frame in sampler {
            let frame = frame?;
            let detections = detector.detect(&frame)?;
            if !aggregator.record(frame.timestamp_secs(), frame.index(), detections) {
                break;
            }
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn pipeline(interval: f64) -> Pipeline {
        let config = AutovisionConfig::from_toml_str("").unwrap();
        let mut settings = PipelineSettings::with_model(&config, ModelConfig::stub(0.0));
        settings.keyframe_interval_secs = interval;
        Pipeline::new(settings).unwrap()
    }

    #[test]
    fn rejects_invalid_settings() {
        let config = AutovisionConfig::from_toml_str("").unwrap();
        let mut settings = PipelineSettings::with_model(&config, ModelConfig::stub(0.5));
        settings.workers = 0;
        assert!(Pipeline::new(settings.clone()).is_err());
        settings.workers = 1;
        settings.keyframe_interval_secs = 0.0;
        assert!(Pipeline::new(settings).is_err());
    }

    #[test]
    fn settings_require_a_model() {
        let config = AutovisionConfig::from_toml_str("").unwrap();
        let err = PipelineSettings::from_config(&config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigError);
    }

    #[test]
    fn processes_synthetic_video() {
        let reference = VideoReference::parse("stub://a?duration=3&fps=5").unwrap();
        let result = pipeline(1.0).process(&reference);
        assert!(result.is_success());
        let stamps: Vec<f64> = result.frames.iter().map(|f| f.timestamp_secs).collect();
        assert_eq!(stamps, vec![0.0, 1.0, 2.0]);
        assert!(result.reference.is_resolved());
    }

    #[test]
    fn cancelled_pipeline_fails_every_video() {
        let pipeline = pipeline(1.0);
        pipeline.cancel_token().cancel();
        let result = pipeline.process(&VideoReference::parse("stub://a").unwrap());
        assert_eq!(result.failure_kind(), Some(ErrorKind::Cancelled));
        assert!(result.frames.is_empty());
    }

    #[test]
    fn locators_keep_order_and_fail_in_place() {
        let results = pipeline(1.0).process_locators(&[
            "stub://one?duration=1".to_string(),
            "ftp://example.com/video.mp4".to_string(),
            "stub://two?duration=2".to_string(),
        ]);
        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert_eq!(results[0].frames.len(), 1);
        assert_eq!(results[1].failure_kind(), Some(ErrorKind::ConfigError));
        assert_eq!(results[1].reference.locator(), "ftp://example.com/video.mp4");
        assert!(results[2].is_success());
        assert_eq!(results[2].frames.len(), 2);
    }

    #[test]
    fn panic_payloads_are_readable() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&"bang".to_string()), "bang");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
