//! Local file frame source.
//!
//! `FileSource` decodes a video file on local disk. Remote references end up
//! here too, once they have been fetched into the cache directory.
//! The file source is responsible for:
//! - Refusing paths that do not exist (`SourceUnavailable`)
//! - Producing RGB24 frames at the native rate with stream timestamps
//! - Stopping its decoder on `close()`
//!
//! Decoding goes through the `ffmpeg`/`ffprobe` executables unless the crate
//! is built with `ingest-file-ffmpeg`, which links libav* and decodes
//! in-process instead.

use std::path::{Path, PathBuf};

use super::ffmpeg_cli::CliDecoderSource;
#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegFileSource;
use super::{FrameSource, SourceStats};
use crate::cancel::CancelToken;
use crate::config::SourceSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::video::VideoMetadata;

/// Local file frame source.
pub struct FileSource {
    path: PathBuf,
    backend: FileBackend,
}

enum FileBackend {
    Cli(CliDecoderSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl FileSource {
    /// Open a local file. `cancel` is checked while probing and while
    /// waiting for decoded frames.
    pub fn open(
        path: impl AsRef<Path>,
        settings: &SourceSettings,
        cancel: &CancelToken,
    ) -> PipelineResult<Self> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(PipelineError::SourceUnavailable(
                "empty file path".to_string(),
            ));
        }
        if !path.is_file() {
            return Err(PipelineError::SourceUnavailable(format!(
                "no such file: {}",
                path.display()
            )));
        }

        #[cfg(feature = "ingest-file-ffmpeg")]
        let backend = FileBackend::Ffmpeg(FfmpegFileSource::new(path, settings, cancel)?);
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        let backend = FileBackend::Cli(CliDecoderSource::spawn(path, settings, cancel)?);

        Ok(Self {
            path: path.to_path_buf(),
            backend,
        })
    }

    /// Force the executable-based decoder regardless of build features.
    pub fn open_with_cli(
        path: impl AsRef<Path>,
        settings: &SourceSettings,
        cancel: &CancelToken,
    ) -> PipelineResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(PipelineError::SourceUnavailable(format!(
                "no such file: {}",
                path.display()
            )));
        }
        Ok(Self {
            path: path.to_path_buf(),
            backend: FileBackend::Cli(CliDecoderSource::spawn(path, settings, cancel)?),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FrameSource for FileSource {
    fn name(&self) -> &'static str {
        match &self.backend {
            FileBackend::Cli(source) => source.name(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.name(),
        }
    }

    fn metadata(&self) -> &VideoMetadata {
        match &self.backend {
            FileBackend::Cli(source) => source.metadata(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.metadata(),
        }
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        match &mut self.backend {
            FileBackend::Cli(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            FileBackend::Cli(source) => source.close(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.close(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            FileBackend::Cli(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            FileBackend::Ffmpeg(source) => source.stats(),
        }
    }
}
