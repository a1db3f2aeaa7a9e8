//! Video references.
//!
//! A `VideoReference` names one video by its locator (URL or local path) and,
//! once the source has opened it, carries the decoded stream metadata. Fields
//! are private: resolving consumes the unresolved reference and hands back a
//! resolved one, so a resolved reference never changes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use url::Url;

use crate::error::{PipelineError, PipelineResult};

const YOUTUBE_HOSTS: &[&str] = &[
    "youtube.com",
    "www.youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtube-nocookie.com",
    "www.youtube-nocookie.com",
];
const YOUTUBE_SHORT_HOST: &str = "youtu.be";
const SYNTHETIC_SCHEME: &str = "stub://";
const MAX_SLUG_STEM: usize = 40;

/// Where a video comes from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceKind {
    Youtube { video_id: String },
    Http,
    Local,
    Synthetic,
    /// Locator that could not be parsed; only seen in failed results.
    Invalid,
}

/// Stream properties discovered when a source is opened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Duration in seconds (0.0 when the container does not report one).
    pub duration_secs: f64,
    /// Native frame rate.
    pub fps: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VideoReference {
    locator: String,
    kind: SourceKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<VideoMetadata>,
}

impl VideoReference {
    /// Parse a locator into an unresolved reference.
    pub fn parse(locator: &str) -> PipelineResult<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(PipelineError::ConfigError(
                "video locator must not be empty".to_string(),
            ));
        }
        let kind = classify(locator)?;
        Ok(Self {
            locator: locator.to_string(),
            kind,
            metadata: None,
        })
    }

    /// Placeholder reference for a locator `parse` rejected.
    pub fn unparsed(locator: &str) -> Self {
        Self {
            locator: locator.trim().to_string(),
            kind: SourceKind::Invalid,
            metadata: None,
        }
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub fn kind(&self) -> &SourceKind {
        &self.kind
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.metadata.as_ref()
    }

    pub fn is_resolved(&self) -> bool {
        self.metadata.is_some()
    }

    /// Attach stream metadata. An already resolved reference is returned unchanged.
    pub fn resolve(mut self, metadata: VideoMetadata) -> Self {
        if self.metadata.is_none() {
            self.metadata = Some(metadata);
        } else {
            log::debug!("{} already resolved; keeping original metadata", self.locator);
        }
        self
    }

    /// Local filesystem path for `Local` references.
    pub fn local_path(&self) -> Option<&str> {
        if self.kind != SourceKind::Local {
            return None;
        }
        Some(self.locator.strip_prefix("file://").unwrap_or(&self.locator))
    }

    /// Filesystem-safe name used for output and cache files.
    pub fn slug(&self) -> String {
        if let SourceKind::Youtube { video_id } = &self.kind {
            return format!("yt-{}", video_id);
        }
        let tail = self
            .locator
            .trim_end_matches('/')
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default();
        let tail = tail.split(['?', '#']).next().unwrap_or_default();
        let stem = tail.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(tail);
        let mut clean: String = stem
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .take(MAX_SLUG_STEM)
            .collect();
        if clean.is_empty() {
            clean.push_str("video");
        }
        let digest = Sha256::digest(self.locator.as_bytes());
        let short: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
        format!("{}-{}", clean, short)
    }
}

impl std::fmt::Display for VideoReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.locator)
    }
}

fn classify(locator: &str) -> PipelineResult<SourceKind> {
    if locator.starts_with(SYNTHETIC_SCHEME) {
        return Ok(SourceKind::Synthetic);
    }
    if locator.starts_with("file://") {
        return Ok(SourceKind::Local);
    }
    if !locator.contains("://") {
        return Ok(SourceKind::Local);
    }

    let url = Url::parse(locator)
        .map_err(|e| PipelineError::ConfigError(format!("invalid url '{}': {}", locator, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(PipelineError::ConfigError(format!(
                "unsupported url scheme '{}'; expected http(s), file or stub",
                other
            )))
        }
    }

    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    if host == YOUTUBE_SHORT_HOST || YOUTUBE_HOSTS.contains(&host.as_str()) {
        let video_id = youtube_video_id(&url, &host).ok_or_else(|| {
            PipelineError::ConfigError(format!("no YouTube video id in '{}'", locator))
        })?;
        return Ok(SourceKind::Youtube { video_id });
    }
    Ok(SourceKind::Http)
}

fn youtube_video_id(url: &Url, host: &str) -> Option<String> {
    let candidate = if host == YOUTUBE_SHORT_HOST {
        url.path_segments()?.next().map(str::to_string)
    } else {
        let mut segments = url.path_segments()?;
        match segments.next() {
            Some("watch") => url
                .query_pairs()
                .find(|(key, _)| key == "v")
                .map(|(_, value)| value.into_owned()),
            Some("shorts" | "embed" | "live" | "v") => segments.next().map(str::to_string),
            _ => None,
        }
    }?;

    static VIDEO_ID_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = VIDEO_ID_RE.get_or_init(|| regex::Regex::new(r"^[A-Za-z0-9_-]{11}$").unwrap());
    re.is_match(&candidate).then_some(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn youtube_id(locator: &str) -> Option<String> {
        match VideoReference::parse(locator).ok()?.kind {
            SourceKind::Youtube { video_id } => Some(video_id),
            _ => None,
        }
    }

    #[test]
    fn recognizes_youtube_url_shapes() {
        let id = Some("dQw4w9WgXcQ".to_string());
        assert_eq!(youtube_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"), id);
        assert_eq!(youtube_id("https://youtube.com/watch?feature=share&v=dQw4w9WgXcQ"), id);
        assert_eq!(youtube_id("https://youtu.be/dQw4w9WgXcQ?t=42"), id);
        assert_eq!(youtube_id("https://m.youtube.com/shorts/dQw4w9WgXcQ"), id);
        assert_eq!(youtube_id("https://www.youtube.com/embed/dQw4w9WgXcQ"), id);
    }

    #[test]
    fn youtube_url_without_valid_id_is_config_error() {
        let err = VideoReference::parse("https://www.youtube.com/watch?v=test").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ConfigError);
        assert!(VideoReference::parse("https://www.youtube.com/feed/trending").is_err());
    }

    #[test]
    fn classifies_other_locators() {
        let http = VideoReference::parse("https://cdn.example.com/clips/a.mp4").unwrap();
        assert_eq!(http.kind(), &SourceKind::Http);

        let local = VideoReference::parse("  /data/videos/a.mp4 ").unwrap();
        assert_eq!(local.kind(), &SourceKind::Local);
        assert_eq!(local.local_path(), Some("/data/videos/a.mp4"));

        let file_url = VideoReference::parse("file:///data/videos/a.mp4").unwrap();
        assert_eq!(file_url.local_path(), Some("/data/videos/a.mp4"));

        let stub = VideoReference::parse("stub://demo?duration=5").unwrap();
        assert_eq!(stub.kind(), &SourceKind::Synthetic);
        assert_eq!(stub.local_path(), None);

        assert!(VideoReference::parse("").is_err());
        assert!(VideoReference::parse("ftp://example.com/a.mp4").is_err());
    }

    #[test]
    fn resolve_is_write_once() {
        let meta = |fps| VideoMetadata {
            duration_secs: 10.0,
            fps,
            width: 64,
            height: 48,
        };
        let reference = VideoReference::parse("stub://demo").unwrap();
        assert!(!reference.is_resolved());

        let resolved = reference.resolve(meta(30.0));
        let again = resolved.clone().resolve(meta(25.0));
        assert_eq!(again.metadata().unwrap().fps, 30.0);
        assert_eq!(again, resolved);
    }

    #[test]
    fn slugs_are_filesystem_safe_and_distinct() {
        let yt = VideoReference::parse("https://youtu.be/dQw4w9WgXcQ").unwrap();
        assert_eq!(yt.slug(), "yt-dQw4w9WgXcQ");

        let a = VideoReference::parse("https://cdn.example.com/my clip.mp4?sig=1").unwrap();
        let b = VideoReference::parse("https://cdn.example.com/my clip.mp4?sig=2").unwrap();
        assert!(a.slug().starts_with("my_clip-"));
        assert_ne!(a.slug(), b.slug());
        assert!(a
            .slug()
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
