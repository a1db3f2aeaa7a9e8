//! Plain HTTP(S) media download.
//!
//! The body is streamed into a uniquely named `.part` file in the cache and
//! moved to `<cache_dir>/<slug>.<ext>` once complete, so two workers fetching
//! the same URL never write the same file. A file already present in the
//! cache is reused without a request; when two downloads finish, the first
//! one moved into place is kept.

use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use tempfile::NamedTempFile;
use url::Url;

use crate::cancel::CancelToken;
use crate::config::SourceSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::video::VideoReference;

const CHUNK_BYTES: usize = 64 * 1024;

/// Download `reference` into the cache and return the local path.
pub fn fetch(
    reference: &VideoReference,
    settings: &SourceSettings,
    cancel: &CancelToken,
) -> PipelineResult<PathBuf> {
    let target = cache_path(reference, settings);
    if target.is_file() {
        log::info!("{}: using cached download {}", reference, target.display());
        return Ok(target);
    }
    fs::create_dir_all(&settings.cache_dir).map_err(|e| {
        PipelineError::SourceUnavailable(format!(
            "cannot create cache dir {}: {}",
            settings.cache_dir.display(),
            e
        ))
    })?;

    let agent = ureq::AgentBuilder::new()
        .timeout_connect(settings.timeout)
        .timeout_read(settings.timeout)
        .timeout(settings.download_timeout)
        .build();
    log::info!("{}: downloading", reference);
    let response = agent.get(reference.locator()).call().map_err(|e| match e {
        ureq::Error::Status(code, _) => PipelineError::SourceUnavailable(format!(
            "{} returned HTTP {}",
            reference.locator(),
            code
        )),
        ureq::Error::Transport(t) => PipelineError::SourceUnavailable(format!(
            "fetch {}: {}",
            reference.locator(),
            t
        )),
    })?;

    if let Some(len) = response
        .header("Content-Length")
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        if len > settings.max_download_bytes {
            return Err(too_large(reference, settings.max_download_bytes));
        }
    }

    let mut partial = tempfile::Builder::new()
        .prefix(&format!("{}.", reference.slug()))
        .suffix(".part")
        .tempfile_in(&settings.cache_dir)
        .map_err(|e| {
            PipelineError::Internal(format!(
                "create download file in {}: {}",
                settings.cache_dir.display(),
                e
            ))
        })?;
    stream_body(
        response.into_reader(),
        &mut partial,
        reference,
        settings,
        cancel,
    )?;
    match partial.persist_noclobber(&target) {
        Ok(_) => Ok(target),
        Err(_) if target.is_file() => {
            log::debug!("{}: another worker finished this download first", reference);
            Ok(target)
        }
        Err(e) => Err(PipelineError::Internal(format!(
            "move download into {}: {}",
            target.display(),
            e.error
        ))),
    }
}

fn stream_body(
    mut body: impl Read,
    partial: &mut NamedTempFile,
    reference: &VideoReference,
    settings: &SourceSettings,
    cancel: &CancelToken,
) -> PipelineResult<()> {
    let started = Instant::now();
    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut written: u64 = 0;
    loop {
        cancel.check()?;
        if started.elapsed() > settings.download_timeout {
            return Err(PipelineError::SourceUnavailable(format!(
                "download of {} exceeded {}s",
                reference.locator(),
                settings.download_timeout.as_secs()
            )));
        }
        let n = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(PipelineError::SourceUnavailable(format!(
                    "read body of {}: {}",
                    reference.locator(),
                    e
                )))
            }
        };
        written += n as u64;
        if written > settings.max_download_bytes {
            return Err(too_large(reference, settings.max_download_bytes));
        }
        partial.write_all(&buf[..n]).map_err(|e| {
            PipelineError::Internal(format!("write {}: {}", partial.path().display(), e))
        })?;
    }
    partial.flush().map_err(|e| {
        PipelineError::Internal(format!("flush {}: {}", partial.path().display(), e))
    })?;
    if written == 0 {
        return Err(PipelineError::SourceUnavailable(format!(
            "{} returned an empty body",
            reference.locator()
        )));
    }
    log::debug!("{}: downloaded {} bytes", reference, written);
    Ok(())
}

fn too_large(reference: &VideoReference, limit: u64) -> PipelineError {
    PipelineError::SourceUnavailable(format!(
        "{} is larger than the {} byte download limit",
        reference.locator(),
        limit
    ))
}

fn cache_path(reference: &VideoReference, settings: &SourceSettings) -> PathBuf {
    let ext = Url::parse(reference.locator())
        .ok()
        .and_then(|url| {
            Path::new(url.path())
                .extension()
                .and_then(|e| e.to_str())
                .map(str::to_ascii_lowercase)
        })
        .filter(|ext| !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| settings.download.format.clone());
    settings
        .cache_dir
        .join(format!("{}.{}", reference.slug(), ext))
}
