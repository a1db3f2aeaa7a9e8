//! autovision - keyframe object detection over a batch of videos
//!
//! This binary:
//! 1. Loads the TOML configuration and applies command-line overrides
//! 2. Fetches or opens every configured video
//! 3. Samples keyframes and runs the detector on them
//! 4. Writes one JSON result per video plus summary.json
//!
//! Exit status is 0 only when every video succeeded.

use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

use autovision::cli::{self, Args};

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(args.log_filter()))
        .init();
    log::debug!("autovision {}", autovision::VERSION);

    cli::run(args)
}
