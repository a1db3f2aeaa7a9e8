//! Local file decoding through the `ffprobe` and `ffmpeg` executables.
//!
//! `ffprobe` reports the stream metadata; `ffmpeg` decodes the first video
//! stream to constant-rate RGB24 on its stdout. A reader thread cuts stdout
//! into frames and hands them over a bounded channel so that every wait for
//! the next frame is limited by the source timeout and the cancel token.
//!
//! ffmpeg is run with `-noautorotate`: frames keep the coded size that
//! ffprobe reports even when the container carries a display rotation.

use crossbeam_channel::{Receiver, RecvTimeoutError};
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::process::{self, drain, join_drain, stderr_tail, POLL_INTERVAL};
use super::{FrameSource, SourceStats};
use crate::cancel::CancelToken;
use crate::config::SourceSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::frame::{rgb_len, Frame};
use crate::video::VideoMetadata;

/// Decoded frames buffered between the reader thread and the pipeline.
const FRAME_QUEUE_DEPTH: usize = 4;

/// One frame's pixels, or the read error that ended the stream.
type RawFrame = std::io::Result<Vec<u8>>;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Probe result: metadata plus the exact rate expression for ffmpeg.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ProbeInfo {
    pub metadata: VideoMetadata,
    pub rate: String,
}

/// Run `ffprobe` on a local file.
pub(crate) fn probe(
    path: &Path,
    settings: &SourceSettings,
    cancel: &CancelToken,
) -> PipelineResult<ProbeInfo> {
    let mut cmd = Command::new(&settings.ffprobe_path);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height,r_frame_rate,avg_frame_rate,duration:format=duration",
        "-of",
        "json",
    ])
    .arg(path);

    let output = process::run_with_deadline(
        &mut cmd,
        "ffprobe",
        settings.timeout,
        cancel,
        PipelineError::DecodeError,
    )?;
    if !output.status.success() {
        return Err(PipelineError::DecodeError(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            stderr_tail(&output.stderr)
        )));
    }
    parse_probe_output(&output.stdout)
}

pub(crate) fn parse_probe_output(raw: &str) -> PipelineResult<ProbeInfo> {
    let probe: ProbeOutput = serde_json::from_str(raw)
        .map_err(|e| PipelineError::DecodeError(format!("unreadable ffprobe output: {}", e)))?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| PipelineError::DecodeError("file has no video stream".to_string()))?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => {
            return Err(PipelineError::DecodeError(
                "video stream reports no frame size".to_string(),
            ))
        }
    };

    let (rate, fps) = [stream.avg_frame_rate, stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|expr| parse_frame_rate(&expr).map(|fps| (expr, fps)))
        .ok_or_else(|| {
            PipelineError::DecodeError("video stream reports no frame rate".to_string())
        })?;

    let duration_secs = stream
        .duration
        .as_deref()
        .or(probe.format.as_ref().and_then(|f| f.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    Ok(ProbeInfo {
        metadata: VideoMetadata {
            duration_secs,
            fps,
            width,
            height,
        },
        rate,
    })
}

/// Parse `30000/1001` or `25` into frames per second. Zero rates are `None`.
pub(crate) fn parse_frame_rate(expr: &str) -> Option<f64> {
    let fps = match expr.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den
        }
        None => expr.trim().parse().ok()?,
    };
    (fps.is_finite() && fps > 0.0).then_some(fps)
}

/// Frame source backed by an `ffmpeg` child process.
pub(crate) struct CliDecoderSource {
    path: PathBuf,
    metadata: VideoMetadata,
    child: Option<Child>,
    frames: Receiver<RawFrame>,
    stderr: Option<JoinHandle<String>>,
    timeout: Duration,
    cancel: CancelToken,
    frame_count: u64,
    finished: bool,
}

impl CliDecoderSource {
    pub(crate) fn spawn(
        path: &Path,
        settings: &SourceSettings,
        cancel: &CancelToken,
    ) -> PipelineResult<Self> {
        let info = probe(path, settings, cancel)?;
        let frame_len = rgb_len(info.metadata.width, info.metadata.height).ok_or_else(|| {
            PipelineError::DecodeError("frame dimensions overflow".to_string())
        })?;

        let mut child = Command::new(&settings.ffmpeg_path)
            .args(["-nostdin", "-v", "error", "-noautorotate", "-i"])
            .arg(path)
            .args([
                "-map",
                "0:v:0",
                "-vsync",
                "cfr",
                "-r",
                info.rate.as_str(),
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PipelineError::DecodeError(format!("failed to start ffmpeg: {}", e)))?;

        let stdout = child.stdout.take().ok_or_else(|| {
            PipelineError::Internal("ffmpeg stdout was not captured".to_string())
        })?;
        let stderr = drain(child.stderr.take());

        let (tx, rx) = crossbeam_channel::bounded(FRAME_QUEUE_DEPTH);
        std::thread::spawn(move || {
            let mut stdout = stdout;
            loop {
                let mut buf = vec![0u8; frame_len];
                match read_frame(&mut stdout, &mut buf) {
                    Ok(true) => {
                        if tx.send(Ok(buf)).is_err() {
                            break;
                        }
                    }
                    Ok(false) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        log::debug!(
            "ffmpeg decoding {} at {} fps ({} bytes per frame)",
            path.display(),
            info.rate,
            frame_len
        );
        Ok(Self {
            path: path.to_path_buf(),
            metadata: info.metadata,
            child: Some(child),
            frames: rx,
            stderr,
            timeout: settings.timeout,
            cancel: cancel.clone(),
            frame_count: 0,
            finished: false,
        })
    }

    /// Reap ffmpeg after its stdout closed and report how it exited.
    fn finish(&mut self) -> PipelineResult<Option<Frame>> {
        self.finished = true;
        let Some(mut child) = self.child.take() else {
            return Ok(None);
        };
        let status =
            process::wait_with_deadline(&mut child, "ffmpeg", self.timeout, &self.cancel)?;
        let stderr = join_drain(self.stderr.take());
        if !status.success() {
            return Err(PipelineError::DecodeError(format!(
                "ffmpeg failed decoding {}: {}",
                self.path.display(),
                stderr_tail(&stderr)
            )));
        }
        if self.frame_count == 0 {
            return Err(PipelineError::DecodeError(format!(
                "no frames decoded from {}",
                self.path.display()
            )));
        }
        Ok(None)
    }

    /// Wait for the reader thread in short slices so cancellation is seen
    /// while ffmpeg is still working.
    fn recv_frame(&self) -> PipelineResult<Result<RawFrame, RecvTimeoutError>> {
        let deadline = Instant::now() + self.timeout;
        loop {
            self.cancel.check()?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Err(RecvTimeoutError::Timeout));
            }
            match self.frames.recv_timeout(remaining.min(POLL_INTERVAL)) {
                Err(RecvTimeoutError::Timeout) => continue,
                other => return Ok(other),
            }
        }
    }
}

impl FrameSource for CliDecoderSource {
    fn name(&self) -> &'static str {
        "ffmpeg-cli"
    }

    fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    fn next_frame(&mut self) -> PipelineResult<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        let received = match self.recv_frame() {
            Ok(received) => received,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };
        match received {
            Ok(Ok(pixels)) => {
                let index = self.frame_count;
                self.frame_count += 1;
                let frame = Frame::new(
                    index,
                    index as f64 / self.metadata.fps,
                    self.metadata.width,
                    self.metadata.height,
                    pixels,
                )?;
                Ok(Some(frame))
            }
            Ok(Err(e)) => {
                self.close();
                Err(PipelineError::DecodeError(format!(
                    "reading decoded frames from {}: {}",
                    self.path.display(),
                    e
                )))
            }
            Err(RecvTimeoutError::Timeout) => {
                self.close();
                Err(PipelineError::SourceUnavailable(format!(
                    "decoder produced no frame within {:.1}s",
                    self.timeout.as_secs_f64()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => self.finish(),
        }
    }

    fn close(&mut self) {
        self.finished = true;
        if let Some(mut child) = self.child.take() {
            process::kill(&mut child);
            log::debug!("ffmpeg decoder for {} stopped", self.path.display());
        }
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_decoded: self.frame_count,
        }
    }
}

impl Drop for CliDecoderSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Fill `buf` with one frame. `Ok(false)` on a clean end of stream.
fn read_frame(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("truncated frame: {} of {} bytes", filled, buf.len()),
                ))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_json() {
        let raw = r#"{
            "programs": [],
            "streams": [
                {"width": 1280, "height": 720, "r_frame_rate": "30000/1001",
                 "avg_frame_rate": "30000/1001", "duration": "212.045"}
            ],
            "format": {"duration": "212.091000"}
        }"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.rate, "30000/1001");
        assert_eq!(info.metadata.width, 1280);
        assert_eq!(info.metadata.height, 720);
        assert!((info.metadata.fps - 29.97).abs() < 0.01);
        assert_eq!(info.metadata.duration_secs, 212.045);
    }

    #[test]
    fn probe_falls_back_to_format_duration_and_real_rate() {
        let raw = r#"{"streams": [{"width": 64, "height": 48,
            "r_frame_rate": "25/1", "avg_frame_rate": "0/0"}],
            "format": {"duration": "4.000000"}}"#;
        let info = parse_probe_output(raw).unwrap();
        assert_eq!(info.rate, "25/1");
        assert_eq!(info.metadata.fps, 25.0);
        assert_eq!(info.metadata.duration_secs, 4.0);
    }

    #[test]
    fn probe_without_video_stream_is_decode_error() {
        for raw in [
            r#"{"streams": [], "format": {"duration": "3.0"}}"#,
            r#"{"streams": [{"width": 0, "height": 0, "r_frame_rate": "25/1"}]}"#,
            r#"{"streams": [{"width": 10, "height": 10, "r_frame_rate": "0/0"}]}"#,
            "not json",
        ] {
            let err = parse_probe_output(raw).unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::DecodeError, "{raw}");
        }
    }

    #[test]
    fn frame_rate_expressions() {
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("24000/1001").map(|f| (f * 1000.0).round()), Some(23976.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn read_frame_distinguishes_clean_eof_from_truncation() {
        let mut buf = [0u8; 4];
        let mut whole = std::io::Cursor::new(vec![1u8, 2, 3, 4]);
        assert!(read_frame(&mut whole, &mut buf).unwrap());
        assert!(!read_frame(&mut whole, &mut buf).unwrap());

        let mut partial = std::io::Cursor::new(vec![1u8, 2]);
        let err = read_frame(&mut partial, &mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn missing_ffprobe_is_decode_error() {
        let mut settings = crate::config::AutovisionConfig::from_toml_str("")
            .unwrap()
            .source;
        settings.ffprobe_path = "/nonexistent/ffprobe-for-autovision-tests".to_string();
        let err = probe(Path::new("clip.mp4"), &settings, &CancelToken::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DecodeError);
    }

    #[cfg(unix)]
    mod fake_tools {
        use super::*;
        use crate::config::AutovisionConfig;
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        const PROBE_JSON: &str = r#"{"streams":[{"width":2,"height":2,"r_frame_rate":"1/1","avg_frame_rate":"1/1","duration":"3"}],"format":{"duration":"3"}}"#;

        /// 2x2 RGB24.
        const FRAME_BYTES: usize = 12;

        struct Tools {
            dir: tempfile::TempDir,
            video: PathBuf,
            settings: SourceSettings,
        }

        impl Tools {
            fn new(ffmpeg_body: &str, timeout: Duration) -> Self {
                let dir = tempfile::tempdir().unwrap();
                let ffprobe = dir.path().join("ffprobe");
                fs::write(&ffprobe, format!("#!/bin/sh\necho '{}'\n", PROBE_JSON)).unwrap();
                let ffmpeg = dir.path().join("ffmpeg");
                fs::write(
                    &ffmpeg,
                    format!(
                        "#!/bin/sh\necho \"$@\" > '{}'\n{}\n",
                        dir.path().join("ffmpeg.args").display(),
                        ffmpeg_body
                    ),
                )
                .unwrap();
                for tool in [&ffprobe, &ffmpeg] {
                    fs::set_permissions(tool, fs::Permissions::from_mode(0o755)).unwrap();
                }
                let video = dir.path().join("clip.mp4");
                fs::write(&video, b"contents are never read by the fake tools").unwrap();

                let mut settings = AutovisionConfig::from_toml_str("").unwrap().source;
                settings.ffprobe_path = ffprobe.to_string_lossy().into_owned();
                settings.ffmpeg_path = ffmpeg.to_string_lossy().into_owned();
                settings.timeout = timeout;
                Self {
                    dir,
                    video,
                    settings,
                }
            }

            fn spawn(&self, cancel: &CancelToken) -> CliDecoderSource {
                CliDecoderSource::spawn(&self.video, &self.settings, cancel)
                    .unwrap_or_else(|e| panic!("spawn failed: {e}"))
            }

            fn ffmpeg_args(&self) -> String {
                fs::read_to_string(self.dir.path().join("ffmpeg.args")).unwrap()
            }
        }

        fn emit(frames_bytes: usize) -> String {
            format!("head -c {} /dev/zero", frames_bytes)
        }

        #[test]
        fn decodes_frames_until_clean_exit() {
            let tools = Tools::new(&emit(3 * FRAME_BYTES), Duration::from_secs(10));
            let mut source = tools.spawn(&CancelToken::new());
            assert_eq!(source.metadata().width, 2);

            let mut stamps = Vec::new();
            while let Some(frame) = source.next_frame().unwrap() {
                assert_eq!((frame.width(), frame.height()), (2, 2));
                stamps.push(frame.timestamp_secs());
            }
            assert_eq!(stamps, vec![0.0, 1.0, 2.0]);
            assert!(source.next_frame().unwrap().is_none());
            assert_eq!(source.stats().frames_decoded, 3);
        }

        #[test]
        fn ffmpeg_keeps_coded_orientation() {
            let tools = Tools::new(&emit(FRAME_BYTES), Duration::from_secs(10));
            let mut source = tools.spawn(&CancelToken::new());
            while source.next_frame().unwrap().is_some() {}

            let args = tools.ffmpeg_args();
            let noautorotate = args.find("-noautorotate").expect("-noautorotate passed");
            let input = args.find(" -i ").expect("input flag");
            assert!(noautorotate < input, "{args}");
        }

        #[test]
        fn failing_ffmpeg_is_decode_error_after_earlier_frames() {
            let body = format!("{}\necho 'corrupt packet' >&2\nexit 1", emit(FRAME_BYTES));
            let tools = Tools::new(&body, Duration::from_secs(10));
            let mut source = tools.spawn(&CancelToken::new());

            assert!(source.next_frame().unwrap().is_some());
            let err = source.next_frame().unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::DecodeError);
            assert!(err.message().contains("corrupt packet"), "{}", err.message());
        }

        #[test]
        fn truncated_final_frame_is_decode_error() {
            let tools = Tools::new(&emit(FRAME_BYTES + FRAME_BYTES / 2), Duration::from_secs(10));
            let mut source = tools.spawn(&CancelToken::new());

            assert!(source.next_frame().unwrap().is_some());
            let err = source.next_frame().unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::DecodeError);
            assert!(err.message().contains("truncated"), "{}", err.message());
        }

        #[test]
        fn empty_output_is_decode_error() {
            let tools = Tools::new("exit 0", Duration::from_secs(10));
            let mut source = tools.spawn(&CancelToken::new());
            let err = source.next_frame().unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::DecodeError);
        }

        #[test]
        fn stalled_decoder_times_out() {
            let body = format!("{}\nexec sleep 30", emit(FRAME_BYTES));
            let tools = Tools::new(&body, Duration::from_secs(1));
            let mut source = tools.spawn(&CancelToken::new());

            assert!(source.next_frame().unwrap().is_some());
            let started = Instant::now();
            let err = source.next_frame().unwrap_err();
            assert_eq!(err.kind(), crate::ErrorKind::SourceUnavailable);
            assert!(started.elapsed() < Duration::from_secs(5));
            assert!(source.next_frame().unwrap().is_none());
        }

        #[test]
        fn cancel_interrupts_a_stalled_decoder() {
            let body = format!("{}\nexec sleep 30", emit(FRAME_BYTES));
            let tools = Tools::new(&body, Duration::from_secs(30));
            let cancel = CancelToken::new();
            let mut source = tools.spawn(&cancel);
            assert!(source.next_frame().unwrap().is_some());

            let trigger = cancel.clone();
            let canceller = std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                trigger.cancel();
            });
            let started = Instant::now();
            let err = source.next_frame().unwrap_err();
            canceller.join().unwrap();

            assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
            assert!(started.elapsed() < Duration::from_secs(5));
        }
    }
}
