//! Decoded frames.
//!
//! A `Frame` is produced by a video source, handed through the sampler to the
//! detector and dropped once detection has run. It deliberately has no
//! `Clone` impl: exactly one pipeline stage owns a frame at any time.

use crate::error::{PipelineError, PipelineResult};

/// Bytes per pixel for the RGB24 layout every source decodes into.
pub const RGB_CHANNELS: usize = 3;

/// One decoded RGB24 frame.
pub struct Frame {
    index: u64,
    timestamp_secs: f64,
    width: u32,
    height: u32,
    /// Row-major RGB24, no padding between rows.
    pixels: Vec<u8>,
}

// Explicitly NOT implementing Clone.

impl Frame {
    /// Build a frame, checking that the buffer matches the dimensions.
    pub fn new(
        index: u64,
        timestamp_secs: f64,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> PipelineResult<Self> {
        if !timestamp_secs.is_finite() || timestamp_secs < 0.0 {
            return Err(PipelineError::DecodeError(format!(
                "frame {} has invalid timestamp {}",
                index, timestamp_secs
            )));
        }
        let expected = rgb_len(width, height).ok_or_else(|| {
            PipelineError::DecodeError(format!("frame dimensions {}x{} overflow", width, height))
        })?;
        if pixels.len() != expected {
            return Err(PipelineError::DecodeError(format!(
                "frame {} expected {} RGB bytes for {}x{}, received {}",
                index,
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            index,
            timestamp_secs,
            width,
            height,
            pixels,
        })
    }

    /// Position of this frame in the source's native frame sequence.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Presentation timestamp in seconds from the start of the video.
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_secs
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Read-only pixel access for detectors.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Pixel content is never logged.
        f.debug_struct("Frame")
            .field("index", &self.index)
            .field("timestamp_secs", &self.timestamp_secs)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

/// Byte length of an RGB24 buffer, `None` on overflow.
pub fn rgb_len(width: u32, height: u32) -> Option<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(RGB_CHANNELS))
}
