//! AutoVision
//!
//! Batch object detection over video keyframes.
//!
//! # Architecture
//!
//! Each video flows through four stages:
//!
//! 1. **Source**: resolve a locator (YouTube, HTTP, local file, synthetic)
//!    into a stream of decoded RGB frames.
//! 2. **Sampler**: keep one frame per keyframe interval.
//! 3. **Detector**: run the configured model on each kept frame.
//! 4. **Aggregator**: collect detections into a `VideoResult` whose status
//!    is either succeeded or failed with the first fatal error.
//!
//! Videos are processed independently on a worker pool; one video failing
//! never affects another.
//!
//! # Module Structure
//!
//! - `config`: TOML configuration with environment overrides
//! - `video`, `frame`: video references and decoded frames
//! - `ingest`: frame sources (ffmpeg, HTTP, yt-dlp, synthetic)
//! - `sampler`, `detect`, `aggregate`: the per-video stages
//! - `pipeline`: per-video orchestration and the worker pool
//! - `output`, `ui`, `cli`: result files and the command-line front end

pub mod aggregate;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod output;
pub mod pipeline;
pub mod sampler;
pub mod ui;
pub mod video;

pub use aggregate::{FrameDetections, ResultAggregator, VideoResult, VideoStatus};
pub use cancel::CancelToken;
pub use config::{AutovisionConfig, BackendKind, ModelConfig, SourceSettings};
pub use detect::{BoundingBox, Detection, Detector, DetectorBackend};
pub use error::{ErrorKind, PipelineError, PipelineResult};
pub use frame::Frame;
pub use ingest::{open_source, FrameSource, SyntheticConfig, SyntheticSource};
pub use output::ResultWriter;
pub use pipeline::{Pipeline, PipelineSettings};
pub use sampler::FrameSampler;
pub use video::{SourceKind, VideoMetadata, VideoReference};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
