use crate::error::PipelineResult;
use crate::frame::Frame;

use super::result::Detection;

/// Detector backend trait.
///
/// Backends return every candidate they find; confidence filtering and
/// ordering happen in `Detector`. Implementations treat the frame as
/// read-only and must not retain its pixels after `detect` returns.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame. An empty list is a valid answer.
    fn detect(&mut self, frame: &Frame) -> PipelineResult<Vec<Detection>>;

    /// Optional warm-up hook, run once after loading.
    fn warm_up(&mut self) -> PipelineResult<()> {
        Ok(())
    }
}
