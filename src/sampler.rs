//! Keyframe sampling.
//!
//! `FrameSampler` thins a native-rate frame stream down to one frame per
//! keyframe interval. A frame is emitted when its timestamp reaches the last
//! emitted timestamp plus the interval; the first frame at or after zero is
//! always emitted. A 120 s clip sampled every 30 s yields frames at 0, 30, 60
//! and 90 s.

use crate::cancel::CancelToken;
use crate::config::validate_interval;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::ingest::FrameSource;

/// Slack for float timestamps that land a hair before the boundary.
const TIMESTAMP_EPSILON: f64 = 1e-6;

pub struct FrameSampler {
    source: Box<dyn FrameSource>,
    interval_secs: f64,
    cancel: CancelToken,
    last_emitted: Option<f64>,
    frames_seen: u64,
    frames_emitted: u64,
    done: bool,
}

impl FrameSampler {
    pub fn new(
        source: Box<dyn FrameSource>,
        interval_secs: f64,
        cancel: CancelToken,
    ) -> PipelineResult<Self> {
        validate_interval(interval_secs)?;
        Ok(Self {
            source,
            interval_secs,
            cancel,
            last_emitted: None,
            frames_seen: 0,
            frames_emitted: 0,
            done: false,
        })
    }

    pub fn interval_secs(&self) -> f64 {
        self.interval_secs
    }

    /// Frames read from the source so far.
    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    fn should_emit(&self, timestamp: f64) -> bool {
        match self.last_emitted {
            None => timestamp >= 0.0,
            Some(last) => timestamp + TIMESTAMP_EPSILON >= last + self.interval_secs,
        }
    }

    fn stop(&mut self) {
        self.done = true;
        self.source.close();
    }
}

impl Iterator for FrameSampler {
    type Item = PipelineResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if self.cancel.is_cancelled() {
                self.stop();
                return Some(Err(PipelineError::Cancelled));
            }
            match self.source.next_frame() {
                Ok(Some(frame)) => {
                    self.frames_seen += 1;
                    if self.should_emit(frame.timestamp_secs()) {
                        self.last_emitted = Some(frame.timestamp_secs());
                        self.frames_emitted += 1;
                        return Some(Ok(frame));
                    }
                }
                Ok(None) => {
                    self.stop();
                    log::debug!(
                        "sampler: kept {} of {} frames",
                        self.frames_emitted,
                        self.frames_seen
                    );
                    return None;
                }
                Err(e) => {
                    self.stop();
                    return Some(Err(e));
                }
            }
        }
    }
}

impl std::iter::FusedIterator for FrameSampler {}

impl Drop for FrameSampler {
    fn drop(&mut self) {
        self.source.close();
    }
}
