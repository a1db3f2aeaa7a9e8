//! Command-line front end for the `autovision` binary.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

use crate::cancel::CancelToken;
use crate::config::AutovisionConfig;
use crate::output::ResultWriter;
use crate::pipeline::{Pipeline, PipelineSettings};
use crate::ui::{Stage, Ui, UiMode};
use crate::video::VideoReference;

#[derive(Parser, Debug)]
#[command(
    name = "autovision",
    author,
    version,
    about = "Sample keyframes from videos and run object detection on them"
)]
pub struct Args {
    /// Video URLs or local paths. Replaces the configured URL list.
    #[arg(value_name = "URL")]
    pub urls: Vec<String>,

    /// TOML configuration file.
    #[arg(short, long, env = "AUTOVISION_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Debug logging.
    #[arg(short, long)]
    pub verbose: bool,

    /// Parse and list the videos that would be processed, then exit.
    #[arg(long)]
    pub dry_run: bool,

    /// Directory for result files (overrides project.output_dir).
    #[arg(long, value_name = "PATH")]
    pub output_dir: Option<PathBuf>,

    /// Videos processed in parallel (overrides runtime.workers).
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Detector override. Only `stub` is accepted; it needs no model file.
    #[arg(long, value_name = "BACKEND")]
    pub detector: Option<String>,

    /// Stderr progress display.
    #[arg(long, value_enum, default_value_t = UiMode::Auto, value_name = "MODE")]
    pub ui: UiMode,
}

impl Args {
    /// Default log filter for these arguments.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}

/// Run the CLI. Failures that concern one video never surface here; they
/// only change the exit code.
pub fn run(args: Args) -> Result<ExitCode> {
    run_with_cancel(args, install_ctrlc())
}

pub fn run_with_cancel(args: Args, cancel: CancelToken) -> Result<ExitCode> {
    let ui = Ui::new(args.ui, std::io::stderr().is_terminal());

    let config = {
        let mut stage = ui.stage(Stage::Configure);
        let config = load_config(&args);
        if config.is_err() {
            stage.fail();
        }
        config
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            log::error!("{:#}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    if args.dry_run {
        return Ok(dry_run(&config.video_urls));
    }
    if config.video_urls.is_empty() {
        log::error!("no videos to process; pass URLs or set input.youtube.video_urls");
        return Ok(ExitCode::FAILURE);
    }

    let settings = match args.detector.as_deref() {
        Some(_) => PipelineSettings::with_model(&config, config.stub_model()),
        None => match PipelineSettings::from_config(&config) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("{} (use --detector stub to run without a model)", e);
                return Ok(ExitCode::FAILURE);
            }
        },
    };
    let pipeline = Pipeline::new(settings)
        .context("build pipeline")?
        .with_cancel(cancel);

    log::info!(
        "{}: {} video(s), keyframe every {}s, {} worker(s), model '{}'",
        config.project_name,
        config.video_urls.len(),
        config.keyframe_interval_secs,
        config.workers,
        pipeline.settings().model.name
    );

    let results = {
        let _stage = ui.stage(Stage::Process {
            videos: config.video_urls.len(),
            workers: config.workers,
        });
        let progress = ui.videos(config.video_urls.len());
        pipeline.process_locators_with(&config.video_urls, &|result| progress.finished(result))
    };

    {
        let mut stage = ui.stage(Stage::Write {
            dir: config.output_dir.clone(),
        });
        let writer = ResultWriter::new(&config.output_dir, &config.project_name);
        if let Err(e) = writer.write_all(&results) {
            stage.fail();
            return Err(e.context("write results"));
        }
    }

    let failed = results.iter().filter(|r| !r.is_success()).count();
    if failed == 0 {
        log::info!("all {} video(s) succeeded", results.len());
        Ok(ExitCode::SUCCESS)
    } else {
        log::warn!("{} of {} video(s) failed", failed, results.len());
        Ok(ExitCode::FAILURE)
    }
}

/// Configuration with command-line overrides applied.
pub fn load_config(args: &Args) -> Result<AutovisionConfig> {
    if let Some(detector) = args.detector.as_deref() {
        if detector != "stub" {
            return Err(anyhow!(
                "unsupported --detector '{}'; only 'stub' can be selected on the command line",
                detector
            ));
        }
    }
    let mut config = AutovisionConfig::load(args.config.as_deref())?;
    if !args.urls.is_empty() {
        config.video_urls = args.urls.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    config.validate()?;
    Ok(config)
}

fn dry_run(locators: &[String]) -> ExitCode {
    let mut invalid = 0;
    for locator in locators {
        match VideoReference::parse(locator) {
            Ok(reference) => println!("{}\t{}", reference.slug(), reference.locator()),
            Err(e) => {
                invalid += 1;
                println!("INVALID\t{}\t{}", locator, e);
            }
        }
    }
    if invalid == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn install_ctrlc() -> CancelToken {
    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        log::warn!("interrupt received; stopping after in-flight frames");
        handler_token.cancel();
    }) {
        log::warn!("Ctrl-C handler not installed: {}", e);
    }
    cancel
}
