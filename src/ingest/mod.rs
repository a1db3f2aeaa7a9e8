//! Video sources.
//!
//! This module resolves a `VideoReference` into a stream of decoded frames:
//! - Synthetic `stub://` streams (testing, demos)
//! - Local video files (ffmpeg executables, or in-process with the
//!   `ingest-file-ffmpeg` feature)
//! - Plain HTTP(S) media URLs (downloaded into the cache directory first)
//! - YouTube URLs (fetched with yt-dlp into the cache directory first)
//!
//! Every source produces frames at the native frame rate, in presentation
//! order, as RGB24 `Frame` values. Sources are responsible for:
//! - Bounding every blocking operation by the configured timeout
//! - Releasing child processes and stream handles on `close()` and on drop
//! - Reporting fetch failures as `SourceUnavailable` and container/codec
//!   failures as `DecodeError`

mod ffmpeg_cli;
pub mod file;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod http;
mod process;
pub mod synthetic;
pub mod youtube;

pub use file::FileSource;
pub use synthetic::{SyntheticConfig, SyntheticSource};

use crate::cancel::CancelToken;
use crate::config::SourceSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::video::{SourceKind, VideoMetadata, VideoReference};

/// A forward-only stream of decoded frames.
pub trait FrameSource: Send {
    /// Backend identifier for logs.
    fn name(&self) -> &'static str;

    /// Stream metadata, known once the source is open.
    fn metadata(&self) -> &VideoMetadata;

    /// Next frame in presentation order, `Ok(None)` at end of stream.
    fn next_frame(&mut self) -> PipelineResult<Option<Frame>>;

    /// Release decoder processes and stream handles. Idempotent.
    fn close(&mut self) {}

    /// Frame statistics.
    fn stats(&self) -> SourceStats;
}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_decoded: u64,
}

/// An opened source together with the reference resolved against it.
pub struct OpenedSource {
    pub reference: VideoReference,
    pub source: Box<dyn FrameSource>,
}

/// Resolve a reference into an open frame source.
///
/// Remote references are fetched into `settings.cache_dir` first and then
/// decoded as local files.
pub fn open_source(
    reference: &VideoReference,
    settings: &SourceSettings,
    cancel: &CancelToken,
) -> PipelineResult<OpenedSource> {
    cancel.check()?;
    let source: Box<dyn FrameSource> = match reference.kind() {
        SourceKind::Synthetic => Box::new(SyntheticSource::from_locator(reference.locator())?),
        SourceKind::Local => {
            let path = reference.local_path().unwrap_or(reference.locator());
            Box::new(FileSource::open(path, settings, cancel)?)
        }
        SourceKind::Http => {
            let path = http::fetch(reference, settings, cancel)?;
            Box::new(FileSource::open(&path, settings, cancel)?)
        }
        SourceKind::Youtube { video_id } => {
            let path = youtube::fetch(video_id, reference, settings, cancel)?;
            Box::new(FileSource::open(&path, settings, cancel)?)
        }
        SourceKind::Invalid => {
            return Err(PipelineError::ConfigError(format!(
                "unrecognized video locator '{}'",
                reference.locator()
            )))
        }
    };

    let metadata = source.metadata().clone();
    log::info!(
        "{}: opened with {} source ({}x{} @ {:.3} fps, {:.1}s)",
        reference,
        source.name(),
        metadata.width,
        metadata.height,
        metadata.fps,
        metadata.duration_secs
    );
    Ok(OpenedSource {
        reference: reference.clone().resolve(metadata),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AutovisionConfig;

    #[test]
    fn opens_synthetic_reference_and_resolves_metadata() {
        let cfg = AutovisionConfig::from_toml_str("").unwrap();
        let reference = VideoReference::parse("stub://demo?duration=2&fps=10").unwrap();
        let mut opened = open_source(&reference, &cfg.source, &CancelToken::new()).unwrap();

        let meta = opened.reference.metadata().unwrap();
        assert_eq!(meta.fps, 10.0);
        assert_eq!(meta.duration_secs, 2.0);

        let mut count = 0;
        while opened.source.next_frame().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 20);
        assert_eq!(opened.source.stats().frames_decoded, 20);
    }

    #[test]
    fn cancelled_token_stops_before_opening() {
        let cfg = AutovisionConfig::from_toml_str("").unwrap();
        let reference = VideoReference::parse("stub://demo").unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = open_source(&reference, &cfg.source, &cancel).err().unwrap();
        assert_eq!(err, crate::PipelineError::Cancelled);
    }

    #[test]
    fn missing_local_file_is_source_unavailable() {
        let cfg = AutovisionConfig::from_toml_str("").unwrap();
        let reference = VideoReference::parse("/definitely/not/here.mp4").unwrap();
        let err = open_source(&reference, &cfg.source, &CancelToken::new())
            .err()
            .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::SourceUnavailable);
    }
}
