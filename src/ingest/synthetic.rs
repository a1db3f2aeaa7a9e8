//! Synthetic frame source.
//!
//! `stub://<name>?duration=<secs>&fps=<fps>&width=<w>&height=<h>&fail_after=<n>`
//! produces a deterministic RGB pattern without touching the filesystem or
//! network. Frame `i` has timestamp `i / fps`. With `fail_after=n`, reading
//! frame `n` fails with `DecodeError`.

use url::Url;

use super::{FrameSource, SourceStats};
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{rgb_len, Frame};
use crate::video::VideoMetadata;

const DEFAULT_DURATION_SECS: f64 = 10.0;
const DEFAULT_FPS: f64 = 30.0;
const DEFAULT_WIDTH: u32 = 64;
const DEFAULT_HEIGHT: u32 = 48;
/// Seconds between synthetic scene changes.
const SCENE_SECS: f64 = 5.0;

/// Configuration for a synthetic source.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub duration_secs: f64,
    pub fps: f64,
    pub width: u32,
    pub height: u32,
    pub fail_after: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            duration_secs: DEFAULT_DURATION_SECS,
            fps: DEFAULT_FPS,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fail_after: None,
        }
    }
}

impl SyntheticConfig {
    /// Parse the query parameters of a `stub://` locator.
    pub fn from_locator(locator: &str) -> PipelineResult<Self> {
        let url = Url::parse(locator).map_err(|e| {
            PipelineError::ConfigError(format!("invalid synthetic locator '{}': {}", locator, e))
        })?;
        let mut cfg = Self::default();
        for (key, value) in url.query_pairs() {
            let bad = || {
                PipelineError::ConfigError(format!(
                    "invalid synthetic parameter {}={} in '{}'",
                    key, value, locator
                ))
            };
            match key.as_ref() {
                "duration" => cfg.duration_secs = value.parse().map_err(|_| bad())?,
                "fps" => cfg.fps = value.parse().map_err(|_| bad())?,
                "width" => cfg.width = value.parse().map_err(|_| bad())?,
                "height" => cfg.height = value.parse().map_err(|_| bad())?,
                "fail_after" => cfg.fail_after = Some(value.parse().map_err(|_| bad())?),
                _ => return Err(bad()),
            }
        }
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> PipelineResult<()> {
        if !self.duration_secs.is_finite() || self.duration_secs < 0.0 {
            return Err(PipelineError::ConfigError(
                "synthetic duration must be a non-negative number".to_string(),
            ));
        }
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(PipelineError::ConfigError(
                "synthetic fps must be positive".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 || rgb_len(self.width, self.height).is_none() {
            return Err(PipelineError::ConfigError(
                "synthetic frame size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Number of frames with a timestamp inside `[0, duration)`.
    pub fn total_frames(&self) -> u64 {
        let exact = self.duration_secs * self.fps;
        let rounded = exact.round();
        if (exact - rounded).abs() < 1e-9 {
            rounded as u64
        } else {
            exact.ceil() as u64
        }
    }
}

/// Deterministic in-memory frame source.
pub struct SyntheticSource {
    config: SyntheticConfig,
    metadata: VideoMetadata,
    next_index: u64,
    closed: bool,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> PipelineResult<Self> {
        config.validate()?;
        let metadata = VideoMetadata {
            duration_secs: config.duration_secs,
            fps: config.fps,
            width: config.width,
            height: config.height,
        };
        Ok(Self {
            config,
            metadata,
            next_index: 0,
            closed: false,
        })
    }

    pub fn from_locator(locator: &str) -> PipelineResult<Self> {
        let source = Self::new(SyntheticConfig::from_locator(locator)?)?;
        log::debug!("synthetic source {} ready", locator);
        Ok(source)
    }

    fn generate_pixels(&self, index: u64) -> Vec<u8> {
        let scene = ((index as f64 / self.config.fps) / SCENE_SECS) as u64;
        let len = rgb_len(self.config.width, self.config.height).unwrap_or_default();
        (0..len)
            .map(|i| ((i as u64 * 7 + index + scene * 31) % 256) as u8)
            .collect()
    }
}

impl FrameSource for SyntheticSource {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        if self.closed || self.next_index >= self.config.total_frames() {
            return Ok(None);
        }
        let index = self.next_index;
        if self.config.fail_after == Some(index) {
            self.closed = true;
            return Err(PipelineError::DecodeError(format!(
                "synthetic decode failure at frame {}",
                index
            )));
        }
        self.next_index += 1;
        let pixels = self.generate_pixels(index);
        let timestamp = index as f64 / self.config.fps;
        Frame::new(
            index,
            timestamp,
            self.config.width,
            self.config.height,
            pixels,
        )
        .map(Some)
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_decoded: self.next_index,
        }
    }
}
