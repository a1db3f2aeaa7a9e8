//! YouTube fetch through `yt-dlp`.
//!
//! Videos land in `<cache_dir>/yt-<id>.<ext>`; any cached file for the same
//! id is reused. Each attempt downloads into its own scratch directory inside
//! the cache and moves the finished file into place, so two workers fetching
//! the same id never share yt-dlp's output or `.part` files. The download
//! runs under `download_timeout` and is killed on cancellation.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::process::{self, stderr_tail};
use crate::cancel::CancelToken;
use crate::config::{DownloadOptions, SourceSettings};
use crate::error::{PipelineError, PipelineResult};
use crate::video::VideoReference;

/// Fetch a YouTube video into the cache and return the local path.
pub fn fetch(
    video_id: &str,
    reference: &VideoReference,
    settings: &SourceSettings,
    cancel: &CancelToken,
) -> PipelineResult<PathBuf> {
    let stem = format!("yt-{}", video_id);
    if let Some(cached) = find_cached(&settings.cache_dir, &stem) {
        log::info!("{}: using cached download {}", reference, cached.display());
        return Ok(cached);
    }
    fs::create_dir_all(&settings.cache_dir).map_err(|e| {
        PipelineError::SourceUnavailable(format!(
            "cannot create cache dir {}: {}",
            settings.cache_dir.display(),
            e
        ))
    })?;

    let scratch = tempfile::Builder::new()
        .prefix(&format!(".{}.", stem))
        .tempdir_in(&settings.cache_dir)
        .map_err(|e| {
            PipelineError::Internal(format!(
                "create download dir in {}: {}",
                settings.cache_dir.display(),
                e
            ))
        })?;
    let template = scratch.path().join(format!("{}.%(ext)s", stem));
    let mut cmd = Command::new(&settings.ytdlp_path);
    cmd.args([
        "--no-playlist",
        "--no-progress",
        "--quiet",
        "--no-warnings",
        "-f",
        format_selector(&settings.download).as_str(),
        "-o",
    ])
    .arg(&template)
    .args(["--print", "after_move:filepath"])
    .arg(reference.locator());

    log::info!("{}: fetching with yt-dlp", reference);
    let output = process::run_with_deadline(
        &mut cmd,
        "yt-dlp",
        settings.download_timeout,
        cancel,
        PipelineError::SourceUnavailable,
    )?;
    if !output.status.success() {
        return Err(PipelineError::SourceUnavailable(format!(
            "yt-dlp failed for {}: {}",
            reference.locator(),
            stderr_tail(&output.stderr)
        )));
    }

    let printed = output
        .stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .map(PathBuf::from);
    let downloaded = printed
        .filter(|path| path.is_file() && path.starts_with(scratch.path()))
        .or_else(|| find_cached(scratch.path(), &stem))
        .ok_or_else(|| {
            PipelineError::SourceUnavailable(format!(
                "yt-dlp reported success but no file was written for {}",
                reference.locator()
            ))
        })?;
    let file_name = downloaded.file_name().ok_or_else(|| {
        PipelineError::Internal(format!("yt-dlp output {} has no file name", downloaded.display()))
    })?;
    let target = settings.cache_dir.join(file_name);
    move_into_cache(&downloaded, &target, &settings.cache_dir, &stem)
}

/// Move a finished download into the cache. If another worker already
/// cached this id, its file wins and ours is discarded with the scratch dir.
fn move_into_cache(
    downloaded: &Path,
    target: &Path,
    cache_dir: &Path,
    stem: &str,
) -> PipelineResult<PathBuf> {
    if let Some(existing) = find_cached(cache_dir, stem) {
        return Ok(existing);
    }
    match fs::rename(downloaded, target) {
        Ok(()) => Ok(target.to_path_buf()),
        Err(e) => find_cached(cache_dir, stem).ok_or_else(|| {
            PipelineError::Internal(format!("move download into {}: {}", target.display(), e))
        }),
    }
}

/// yt-dlp format selector for the configured quality and container.
///
/// `best`/`worst` pick the extreme video stream; `720p` style values cap the
/// height. Each selector falls back to any container, then to a combined
/// stream.
pub(crate) fn format_selector(options: &DownloadOptions) -> String {
    let quality = options.quality.trim().to_ascii_lowercase();
    let (video, combined, filter) = match quality.as_str() {
        "worst" => ("wv*", "w", String::new()),
        other => {
            let height = other
                .strip_suffix('p')
                .and_then(|h| h.parse::<u32>().ok())
                .map(|h| format!("[height<={}]", h))
                .unwrap_or_default();
            ("bv*", "b", height)
        }
    };
    let ext = options.format.trim();
    if ext.is_empty() {
        format!("{video}{filter}/{combined}{filter}")
    } else {
        format!("{video}[ext={ext}]{filter}/{video}{filter}/{combined}{filter}")
    }
}

fn find_cached(cache_dir: &Path, stem: &str) -> Option<PathBuf> {
    let entries = fs::read_dir(cache_dir).ok()?;
    let mut matches: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.file_stem().and_then(|s| s.to_str()) == Some(stem)
                && !matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("part" | "ytdl" | "temp")
                )
        })
        .collect();
    matches.sort();
    matches.into_iter().next()
}
