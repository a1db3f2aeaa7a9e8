//! Local file frame source using FFmpeg.
//!
//! In-process libav* decoder. Frames are converted to RGB24 and stamped from
//! the stream's presentation timestamps.

use ffmpeg_next as ffmpeg;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{FrameSource, SourceStats};
use crate::cancel::CancelToken;
use crate::config::SourceSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::Frame;
use crate::video::VideoMetadata;

pub(crate) struct FfmpegFileSource {
    path: PathBuf,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    metadata: VideoMetadata,
    time_base: f64,
    start_pts: Option<i64>,
    frame_count: u64,
    last_ts: Option<f64>,
    timeout: Duration,
    cancel: CancelToken,
    eof_sent: bool,
    finished: bool,
}

impl FfmpegFileSource {
    pub(crate) fn new(
        path: &Path,
        settings: &SourceSettings,
        cancel: &CancelToken,
    ) -> PipelineResult<Self> {
        let decode_err = |what: &str, e: ffmpeg::Error| {
            PipelineError::DecodeError(format!("{} for {}: {}", what, path.display(), e))
        };
        ffmpeg::init().map_err(|e| PipelineError::Internal(format!("initialize ffmpeg: {}", e)))?;
        let input = ffmpeg::format::input(&path).map_err(|e| decode_err("open input", e))?;
        let stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| PipelineError::DecodeError("file has no video track".to_string()))?;
        let stream_index = stream.index();
        let time_base = f64::from(stream.time_base());
        let rate = f64::from(stream.avg_frame_rate());
        let stream_duration = stream.duration();

        let context = ffmpeg::codec::context::Context::from_parameters(stream.parameters())
            .map_err(|e| decode_err("load decoder parameters", e))?;
        let decoder = context
            .decoder()
            .video()
            .map_err(|e| decode_err("open video decoder", e))?;
        if decoder.width() == 0 || decoder.height() == 0 {
            return Err(PipelineError::DecodeError(
                "video stream reports no frame size".to_string(),
            ));
        }

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .map_err(|e| decode_err("create scaler", e))?;

        let fps = if rate.is_finite() && rate > 0.0 {
            rate
        } else {
            return Err(PipelineError::DecodeError(
                "video stream reports no frame rate".to_string(),
            ));
        };
        let duration_secs = if stream_duration > 0 {
            stream_duration as f64 * time_base
        } else if input.duration() > 0 {
            input.duration() as f64 / 1_000_000.0
        } else {
            0.0
        };

        let metadata = VideoMetadata {
            duration_secs,
            fps,
            width: decoder.width(),
            height: decoder.height(),
        };
        Ok(Self {
            path: path.to_path_buf(),
            input,
            stream_index,
            decoder,
            scaler,
            metadata,
            time_base,
            start_pts: None,
            frame_count: 0,
            last_ts: None,
            timeout: settings.timeout,
            cancel: cancel.clone(),
            eof_sent: false,
            finished: false,
        })
    }

    fn take_decoded(&mut self, decoded: &ffmpeg::frame::Video) -> PipelineResult<Frame> {
        let mut rgb = ffmpeg::frame::Video::empty();
        self.scaler
            .run(decoded, &mut rgb)
            .map_err(|e| PipelineError::DecodeError(format!("scale frame to RGB: {}", e)))?;
        let (pixels, width, height) = frame_to_pixels(&rgb)?;

        let index = self.frame_count;
        self.frame_count += 1;
        let timestamp = self.timestamp_for(decoded.pts(), index);
        self.last_ts = Some(timestamp);
        Frame::new(index, timestamp, width, height, pixels)
    }

    /// Seconds since the first frame, never decreasing.
    fn timestamp_for(&mut self, pts: Option<i64>, index: u64) -> f64 {
        let from_pts = pts.map(|pts| {
            let start = *self.start_pts.get_or_insert(pts);
            ((pts - start) as f64 * self.time_base).max(0.0)
        });
        let ts = from_pts.unwrap_or(index as f64 / self.metadata.fps);
        match self.last_ts {
            Some(last) if ts < last => last,
            _ => ts,
        }
    }
}

impl FrameSource for FfmpegFileSource {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        let deadline = Instant::now() + self.timeout;
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.take_decoded(&decoded).map(Some);
            }
            if self.eof_sent {
                self.finished = true;
                if self.frame_count == 0 {
                    return Err(PipelineError::DecodeError(format!(
                        "no frames decoded from {}",
                        self.path.display()
                    )));
                }
                return Ok(None);
            }
            if self.cancel.is_cancelled() {
                self.finished = true;
                return Err(PipelineError::Cancelled);
            }
            if Instant::now() >= deadline {
                self.finished = true;
                return Err(PipelineError::SourceUnavailable(format!(
                    "decoder produced no frame within {:.1}s",
                    self.timeout.as_secs_f64()
                )));
            }

            let mut packets = self.input.packets();
            let next = loop {
                match packets.next() {
                    Some((stream, packet)) if stream.index() == self.stream_index => {
                        break Some(packet)
                    }
                    Some(_) => continue,
                    None => break None,
                }
            };
            drop(packets);

            match next {
                Some(packet) => self.decoder.send_packet(&packet).map_err(|e| {
                    self.finished = true;
                    PipelineError::DecodeError(format!("send packet to decoder: {}", e))
                })?,
                None => {
                    self.eof_sent = true;
                    self.decoder.send_eof().map_err(|e| {
                        PipelineError::DecodeError(format!("flush decoder: {}", e))
                    })?;
                }
            }
        }
    }

    fn close(&mut self) {
        self.finished = true;
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_decoded: self.frame_count,
        }
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> PipelineResult<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .ok_or_else(|| PipelineError::DecodeError("ffmpeg frame is truncated".to_string()))?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(data.get(start..end).ok_or_else(|| {
            PipelineError::DecodeError("ffmpeg frame row is out of bounds".to_string())
        })?);
    }

    Ok((pixels, width, height))
}
