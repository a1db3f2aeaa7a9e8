//! Deadline-bounded child processes for the external ffmpeg/yt-dlp tools.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{PipelineError, PipelineResult};

/// Granularity of deadline and cancellation checks.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Bytes of stderr kept for error messages.
const STDERR_TAIL_BYTES: usize = 2048;

/// Captured output of a finished process.
pub(crate) struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` to completion, killing it on timeout or cancellation.
///
/// `on_spawn_error` maps a failure to start the tool (usually "not
/// installed") to the caller's error kind. Timeouts are `SourceUnavailable`.
pub(crate) fn run_with_deadline(
    command: &mut Command,
    tool: &str,
    timeout: Duration,
    cancel: &CancelToken,
    on_spawn_error: impl FnOnce(String) -> PipelineError,
) -> PipelineResult<CapturedOutput> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| on_spawn_error(format!("failed to start {}: {}", tool, e)))?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = wait_with_deadline(&mut child, tool, timeout, cancel)?;
    Ok(CapturedOutput {
        status,
        stdout: join_drain(stdout),
        stderr: join_drain(stderr),
    })
}

/// Poll `child` until it exits, the deadline passes, or `cancel` fires.
///
/// The child is killed and reaped on every non-exit path.
pub(crate) fn wait_with_deadline(
    child: &mut Child,
    tool: &str,
    timeout: Duration,
    cancel: &CancelToken,
) -> PipelineResult<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) => {}
            Err(e) => {
                kill(child);
                return Err(PipelineError::Internal(format!(
                    "failed to poll {}: {}",
                    tool, e
                )));
            }
        }
        if cancel.is_cancelled() {
            kill(child);
            return Err(PipelineError::Cancelled);
        }
        if Instant::now() >= deadline {
            kill(child);
            return Err(PipelineError::SourceUnavailable(format!(
                "{} timed out after {:.1}s",
                tool,
                timeout.as_secs_f64()
            )));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

/// Kill and reap a child, ignoring "already exited".
pub(crate) fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Last few lines of a tool's stderr, for error messages.
pub(crate) fn stderr_tail(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.len() <= STDERR_TAIL_BYTES {
        return trimmed.to_string();
    }
    let mut start = trimmed.len() - STDERR_TAIL_BYTES;
    while !trimmed.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &trimmed[start..])
}

pub(crate) fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        std::thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

pub(crate) fn join_drain(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|handle| handle.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_output_of_finished_process() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo out; echo err >&2"]);
        let out = run_with_deadline(
            &mut cmd,
            "sh",
            Duration::from_secs(5),
            &CancelToken::new(),
            PipelineError::Internal,
        )
        .unwrap();
        assert!(out.status.success());
        assert_eq!(out.stdout.trim(), "out");
        assert_eq!(out.stderr.trim(), "err");
    }

    #[test]
    fn slow_process_times_out_as_source_unavailable() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 5"]);
        let started = Instant::now();
        let err = run_with_deadline(
            &mut cmd,
            "sleeper",
            Duration::from_millis(200),
            &CancelToken::new(),
            PipelineError::Internal,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::SourceUnavailable);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_tool_uses_spawn_error_mapping() {
        let mut cmd = Command::new("/nonexistent/tool-for-autovision-tests");
        let err = run_with_deadline(
            &mut cmd,
            "tool",
            Duration::from_secs(1),
            &CancelToken::new(),
            PipelineError::DecodeError,
        )
        .err()
        .unwrap();
        assert_eq!(err.kind(), crate::ErrorKind::DecodeError);
    }

    #[test]
    fn cancelled_process_is_killed() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exec sleep 5"]);
        let err = run_with_deadline(
            &mut cmd,
            "sleeper",
            Duration::from_secs(10),
            &cancel,
            PipelineError::Internal,
        )
        .err()
        .unwrap();
        assert_eq!(err, PipelineError::Cancelled);
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long = "x".repeat(STDERR_TAIL_BYTES + 10) + "END";
        let tail = stderr_tail(&long);
        assert!(tail.starts_with("..."));
        assert!(tail.ends_with("END"));
        assert_eq!(stderr_tail("  short\n"), "short");
    }
}
