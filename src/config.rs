use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{PipelineError, PipelineResult};

const DEFAULT_PROJECT_NAME: &str = "autovision";
const DEFAULT_OUTPUT_DIR: &str = "./output";
const DEFAULT_CACHE_DIR: &str = "./cache";
const DEFAULT_KEYFRAME_INTERVAL_SECS: f64 = 30.0;
const DEFAULT_SOURCE_TIMEOUT_SECS: u64 = 120;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 30 * 60;
const DEFAULT_MAX_DOWNLOAD_BYTES: u64 = 2 * 1024 * 1024 * 1024;
const DEFAULT_YTDLP_PATH: &str = "yt-dlp";
const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
const DEFAULT_FFPROBE_PATH: &str = "ffprobe";
const DEFAULT_QUALITY: &str = "best";
const DEFAULT_FORMAT: &str = "mp4";
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MAX_DETECTIONS: usize = 100;

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    project: Option<ProjectConfigFile>,
    input: Option<InputConfigFile>,
    youtube: Option<YoutubeConfigFile>,
    source: Option<SourceConfigFile>,
    runtime: Option<RuntimeConfigFile>,
    models: Option<ModelsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ProjectConfigFile {
    name: Option<String>,
    output_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct InputConfigFile {
    youtube: Option<YoutubeInputConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct YoutubeInputConfigFile {
    video_urls: Option<Vec<String>>,
    download_options: Option<DownloadOptionsConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DownloadOptionsConfigFile {
    quality: Option<String>,
    format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct YoutubeConfigFile {
    keyframe_interval: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    timeout_secs: Option<u64>,
    download_timeout_secs: Option<u64>,
    cache_dir: Option<PathBuf>,
    ytdlp_path: Option<String>,
    ffmpeg_path: Option<String>,
    ffprobe_path: Option<String>,
    max_download_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RuntimeConfigFile {
    workers: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelsConfigFile {
    object_detection: Option<Vec<ModelConfigFile>>,
}

#[derive(Debug, Deserialize)]
struct ModelConfigFile {
    name: String,
    backend: Option<String>,
    path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
    max_detections: Option<usize>,
    labels: Option<Vec<String>>,
}

/// Fully resolved AutoVision configuration.
#[derive(Debug, Clone)]
pub struct AutovisionConfig {
    pub project_name: String,
    pub output_dir: PathBuf,
    pub video_urls: Vec<String>,
    pub keyframe_interval_secs: f64,
    pub source: SourceSettings,
    pub workers: usize,
    pub models: Vec<ModelConfig>,
}

/// Settings shared by every video source.
#[derive(Debug, Clone)]
pub struct SourceSettings {
    /// Upper bound for any single blocking source operation.
    pub timeout: Duration,
    /// Upper bound for a whole download (HTTP body or yt-dlp run).
    pub download_timeout: Duration,
    pub cache_dir: PathBuf,
    pub ytdlp_path: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub max_download_bytes: u64,
    pub download: DownloadOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// `best`, `worst` or a height such as `720p`.
    pub quality: String,
    /// Preferred container extension.
    pub format: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Deterministic hash-driven detections, no model file.
    Stub,
    /// ONNX model run with tract (feature `backend-tract`).
    Tract,
}

impl BackendKind {
    pub fn parse(value: &str) -> PipelineResult<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stub" => Ok(Self::Stub),
            "tract" | "onnx" => Ok(Self::Tract),
            other => Err(PipelineError::ConfigError(format!(
                "unknown detector backend '{}'; expected 'tract' or 'stub'",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stub => "stub",
            Self::Tract => "tract",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub name: String,
    pub backend: BackendKind,
    pub path: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    pub max_detections: usize,
    /// Class names by class id. Empty means COCO names.
    pub labels: Vec<String>,
}

impl ModelConfig {
    /// Stub detector settings, used when no model file is wanted.
    pub fn stub(confidence_threshold: f32) -> Self {
        Self {
            name: "stub".to_string(),
            backend: BackendKind::Stub,
            path: PathBuf::new(),
            confidence_threshold,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            input_size: DEFAULT_INPUT_SIZE,
            max_detections: DEFAULT_MAX_DETECTIONS,
            labels: Vec::new(),
        }
    }
}

impl AutovisionConfig {
    /// Load from an optional TOML file, then apply environment overrides.
    ///
    /// Without a path every section takes its default.
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        if let Some(path) = path {
            log::info!("loaded configuration from {}", path.display());
        }
        Ok(cfg)
    }

    /// Parse TOML text without consulting the environment.
    pub fn from_toml_str(raw: &str) -> PipelineResult<Self> {
        let file_cfg: ConfigFile = toml::from_str(raw)
            .map_err(|e| PipelineError::ConfigError(format!("invalid config: {}", e)))?;
        let cfg = Self::from_file(file_cfg)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The model the pipeline runs. Extra configured models are ignored.
    pub fn primary_model(&self) -> PipelineResult<&ModelConfig> {
        if self.models.len() > 1 {
            log::warn!(
                "{} object detection models configured; only '{}' is used",
                self.models.len(),
                self.models[0].name
            );
        }
        self.models.first().ok_or_else(|| {
            PipelineError::ConfigError("no object detection model configured".to_string())
        })
    }

    /// Stub detector settings, keeping the primary model's threshold and
    /// labels when one is configured.
    pub fn stub_model(&self) -> ModelConfig {
        match self.models.first() {
            Some(model) => ModelConfig {
                labels: model.labels.clone(),
                ..ModelConfig::stub(model.confidence_threshold)
            },
            None => ModelConfig::stub(DEFAULT_CONFIDENCE_THRESHOLD),
        }
    }

    fn from_file(file: ConfigFile) -> PipelineResult<Self> {
        let project = file.project.unwrap_or_default();
        let youtube_input = file
            .input
            .and_then(|input| input.youtube)
            .unwrap_or_default();
        let download_file = youtube_input.download_options.unwrap_or_default();
        let source_file = file.source.unwrap_or_default();

        let download = DownloadOptions {
            quality: download_file
                .quality
                .unwrap_or_else(|| DEFAULT_QUALITY.to_string()),
            format: download_file
                .format
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
        };
        let source = SourceSettings {
            timeout: Duration::from_secs(
                source_file
                    .timeout_secs
                    .unwrap_or(DEFAULT_SOURCE_TIMEOUT_SECS),
            ),
            download_timeout: Duration::from_secs(
                source_file
                    .download_timeout_secs
                    .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            ),
            cache_dir: source_file
                .cache_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
            ytdlp_path: source_file
                .ytdlp_path
                .unwrap_or_else(|| DEFAULT_YTDLP_PATH.to_string()),
            ffmpeg_path: source_file
                .ffmpeg_path
                .unwrap_or_else(|| DEFAULT_FFMPEG_PATH.to_string()),
            ffprobe_path: source_file
                .ffprobe_path
                .unwrap_or_else(|| DEFAULT_FFPROBE_PATH.to_string()),
            max_download_bytes: source_file
                .max_download_bytes
                .unwrap_or(DEFAULT_MAX_DOWNLOAD_BYTES),
            download,
        };

        let models = file
            .models
            .and_then(|models| models.object_detection)
            .unwrap_or_default()
            .into_iter()
            .map(ModelConfig::from_file)
            .collect::<PipelineResult<Vec<_>>>()?;

        Ok(Self {
            project_name: project
                .name
                .unwrap_or_else(|| DEFAULT_PROJECT_NAME.to_string()),
            output_dir: project
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            video_urls: youtube_input.video_urls.unwrap_or_default(),
            keyframe_interval_secs: file
                .youtube
                .and_then(|youtube| youtube.keyframe_interval)
                .unwrap_or(DEFAULT_KEYFRAME_INTERVAL_SECS),
            source,
            workers: file
                .runtime
                .and_then(|runtime| runtime.workers)
                .unwrap_or(DEFAULT_WORKERS),
            models,
        })
    }

    fn apply_env(&mut self) -> PipelineResult<()> {
        if let Ok(dir) = std::env::var("AUTOVISION_OUTPUT_DIR") {
            if !dir.trim().is_empty() {
                self.output_dir = PathBuf::from(dir);
            }
        }
        if let Ok(urls) = std::env::var("AUTOVISION_VIDEO_URLS") {
            let parsed = split_csv(&urls);
            if !parsed.is_empty() {
                self.video_urls = parsed;
            }
        }
        if let Ok(interval) = std::env::var("AUTOVISION_KEYFRAME_INTERVAL") {
            self.keyframe_interval_secs = interval.trim().parse().map_err(|_| {
                PipelineError::ConfigError(
                    "AUTOVISION_KEYFRAME_INTERVAL must be a number of seconds".to_string(),
                )
            })?;
        }
        if let Ok(threshold) = std::env::var("AUTOVISION_CONFIDENCE_THRESHOLD") {
            let threshold: f32 = threshold.trim().parse().map_err(|_| {
                PipelineError::ConfigError(
                    "AUTOVISION_CONFIDENCE_THRESHOLD must be a number in [0, 1]".to_string(),
                )
            })?;
            for model in &mut self.models {
                model.confidence_threshold = threshold;
            }
        }
        if let Ok(workers) = std::env::var("AUTOVISION_WORKERS") {
            self.workers = workers.trim().parse().map_err(|_| {
                PipelineError::ConfigError("AUTOVISION_WORKERS must be an integer".to_string())
            })?;
        }
        if let Ok(timeout) = std::env::var("AUTOVISION_SOURCE_TIMEOUT_SECS") {
            let seconds: u64 = timeout.trim().parse().map_err(|_| {
                PipelineError::ConfigError(
                    "AUTOVISION_SOURCE_TIMEOUT_SECS must be an integer number of seconds"
                        .to_string(),
                )
            })?;
            self.source.timeout = Duration::from_secs(seconds);
        }
        Ok(())
    }

    /// Check every invariant the pipeline relies on.
    pub fn validate(&self) -> PipelineResult<()> {
        validate_interval(self.keyframe_interval_secs)?;
        if self.workers == 0 {
            return Err(PipelineError::ConfigError(
                "runtime.workers must be at least 1".to_string(),
            ));
        }
        if self.source.timeout.is_zero() || self.source.download_timeout.is_zero() {
            return Err(PipelineError::ConfigError(
                "source.timeout_secs and source.download_timeout_secs must be greater than zero"
                    .to_string(),
            ));
        }
        if self.source.max_download_bytes == 0 {
            return Err(PipelineError::ConfigError(
                "source.max_download_bytes must be greater than zero".to_string(),
            ));
        }
        for model in &self.models {
            model.validate()?;
        }
        Ok(())
    }
}

impl ModelConfig {
    fn from_file(file: ModelConfigFile) -> PipelineResult<Self> {
        let backend = match file.backend.as_deref() {
            Some(name) => BackendKind::parse(name)?,
            None => BackendKind::Tract,
        };
        let path = file
            .path
            .unwrap_or_else(|| PathBuf::from("models").join(format!("{}.onnx", file.name)));
        Ok(Self {
            name: file.name,
            backend,
            path,
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            iou_threshold: file.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
            input_size: file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            max_detections: file.max_detections.unwrap_or(DEFAULT_MAX_DETECTIONS),
            labels: file.labels.unwrap_or_default(),
        })
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.name.trim().is_empty() {
            return Err(PipelineError::ConfigError(
                "model name must not be empty".to_string(),
            ));
        }
        validate_threshold(self.confidence_threshold)?;
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(PipelineError::ConfigError(format!(
                "model '{}': iou_threshold must be in [0, 1], got {}",
                self.name, self.iou_threshold
            )));
        }
        if self.input_size == 0 || self.max_detections == 0 {
            return Err(PipelineError::ConfigError(format!(
                "model '{}': input_size and max_detections must be greater than zero",
                self.name
            )));
        }
        Ok(())
    }
}

/// Keyframe intervals must be finite and strictly positive.
pub fn validate_interval(interval_secs: f64) -> PipelineResult<()> {
    if !interval_secs.is_finite() || interval_secs <= 0.0 {
        return Err(PipelineError::ConfigError(format!(
            "keyframe interval must be a positive number of seconds, got {}",
            interval_secs
        )));
    }
    Ok(())
}

/// Confidence thresholds must lie in [0, 1].
pub fn validate_threshold(threshold: f32) -> PipelineResult<()> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(PipelineError::ConfigError(format!(
            "confidence threshold must be in [0, 1], got {}",
            threshold
        )));
    }
    Ok(())
}

fn read_config_file(path: &Path) -> PipelineResult<ConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::ConfigError(format!(
            "failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    toml::from_str(&raw).map_err(|e| {
        PipelineError::ConfigError(format!("invalid config file {}: {}", path.display(), e))
    })
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
