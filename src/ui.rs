//! Stderr progress for batch runs: one line or spinner per run stage and a
//! bar that ticks as videos finish.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::aggregate::{VideoResult, VideoStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UiMode {
    /// Spinners on a terminal, plain lines otherwise.
    #[default]
    Auto,
    Plain,
    Pretty,
}

/// Phases of a batch run, in the order the CLI enters them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stage {
    Configure,
    Process { videos: usize, workers: usize },
    Write { dir: PathBuf },
}

impl Stage {
    pub fn label(&self) -> String {
        match self {
            Stage::Configure => "Loading configuration".to_string(),
            Stage::Process { videos, workers } => format!(
                "Processing {} video{} on {} worker{}",
                videos,
                plural(*videos),
                workers,
                plural(*workers)
            ),
            Stage::Write { dir } => format!("Writing results to {}", dir.display()),
        }
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    fn use_pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, stage: Stage) -> StageGuard {
        let label = stage.label();
        let spinner = if self.use_pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{label}…"));
            Some(spinner)
        } else {
            eprintln!("==> {}", label);
            None
        };
        StageGuard {
            label,
            start: Instant::now(),
            spinner,
            failed: false,
        }
    }

    /// Per-video progress for a batch of `total` videos.
    pub fn videos(&self, total: usize) -> VideoProgress {
        let bar = self.use_pretty().then(|| {
            let bar = ProgressBar::new(total as u64);
            bar.set_draw_target(ProgressDrawTarget::stderr());
            let style = ProgressStyle::with_template("{bar:30} {pos}/{len} videos {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());
            bar.set_style(style);
            bar
        });
        VideoProgress { bar, total }
    }
}

/// Reports the stage outcome and its wall time when dropped.
pub struct StageGuard {
    label: String,
    start: Instant,
    spinner: Option<ProgressBar>,
    failed: bool,
}

impl StageGuard {
    /// Mark the stage as failed; the closing line gets a cross.
    pub fn fail(&mut self) {
        self.failed = true;
    }

    fn closing_line(&self) -> String {
        let mark = if self.failed { '✘' } else { '✔' };
        format!(
            "{} {} ({})",
            mark,
            self.label,
            format_duration(self.start.elapsed())
        )
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let line = self.closing_line();
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(line),
            None => eprintln!("{line}"),
        }
    }
}

/// Reports finished videos; safe to call from worker threads.
pub struct VideoProgress {
    bar: Option<ProgressBar>,
    total: usize,
}

impl VideoProgress {
    pub fn finished(&self, result: &VideoResult) {
        let line = status_line(result);
        match &self.bar {
            Some(bar) => {
                bar.inc(1);
                bar.println(line);
            }
            None => eprintln!("{line}"),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

impl Drop for VideoProgress {
    fn drop(&mut self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

/// One-line outcome of a video, e.g. `✔ stub://clip: 4 keyframes, 7 detections`.
pub fn status_line(result: &VideoResult) -> String {
    match &result.status {
        VideoStatus::Succeeded => format!(
            "✔ {}: {} keyframes, {} detections",
            result.reference,
            result.frames.len(),
            result.detection_count()
        ),
        VideoStatus::Failed { kind, message } => {
            format!("✘ {}: {} ({})", result.reference, kind, message)
        }
    }
}

/// Milliseconds below a second, seconds below a minute, then `4m07s`.
fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        format!("{}ms", duration.as_millis())
    } else if secs < 60 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}
