//! JSON result files.
//!
//! Each video gets `<output_dir>/<slug>.json`; `summary.json` lists every
//! video with its status and the file holding its detections.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::aggregate::{VideoResult, VideoStatus};

pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Serialize)]
struct Summary<'a> {
    project: &'a str,
    version: &'static str,
    generated_at_unix: u64,
    total: usize,
    succeeded: usize,
    failed: usize,
    videos: Vec<SummaryEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct SummaryEntry<'a> {
    locator: &'a str,
    result_file: String,
    keyframes: usize,
    detections: usize,
    status: &'a VideoStatus,
}

/// Writes result files into one output directory.
pub struct ResultWriter {
    output_dir: PathBuf,
    project: String,
}

impl ResultWriter {
    pub fn new(output_dir: impl Into<PathBuf>, project: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            project: project.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write every result plus the summary. Returns the summary path.
    pub fn write_all(&self, results: &[VideoResult]) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("create output directory {}", self.output_dir.display())
        })?;

        let mut used = HashSet::new();
        let mut entries = Vec::with_capacity(results.len());
        for result in results {
            let file_name = unique_name(&result.reference.slug(), &mut used);
            self.write_json(&file_name, result)?;
            entries.push(SummaryEntry {
                locator: result.reference.locator(),
                result_file: file_name,
                keyframes: result.frames.len(),
                detections: result.detection_count(),
                status: &result.status,
            });
        }

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        let summary = Summary {
            project: &self.project,
            version: crate::VERSION,
            generated_at_unix: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            total: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            videos: entries,
        };
        let path = self.write_json(SUMMARY_FILE, &summary)?;
        log::info!(
            "wrote {} result file(s) and {}",
            results.len(),
            path.display()
        );
        Ok(path)
    }

    fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        let path = self.output_dir.join(file_name);
        let json = serde_json::to_vec_pretty(value)
            .with_context(|| format!("serialize {}", file_name))?;
        fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

/// `<slug>.json`, suffixed `-2`, `-3`, ... when the slug repeats.
fn unique_name(slug: &str, used: &mut HashSet<String>) -> String {
    let mut name = format!("{}.json", slug);
    let mut n = 2;
    while used.contains(&name) || name == SUMMARY_FILE {
        name = format!("{}-{}.json", slug, n);
        n += 1;
    }
    used.insert(name.clone());
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::ResultAggregator;
    use crate::error::PipelineError;
    use crate::video::VideoReference;

    fn result(locator: &str, fail: bool) -> VideoResult {
        let mut agg = ResultAggregator::new(VideoReference::parse(locator).unwrap());
        agg.record(0.0, 0, Vec::new());
        if fail {
            agg.fail(&PipelineError::DecodeError("corrupt".to_string()));
        }
        agg.finish()
    }

    #[test]
    fn writes_results_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("nested/output");
        let writer = ResultWriter::new(&out, "demo");
        let results = vec![
            result("https://www.youtube.com/watch?v=dQw4w9WgXcQ", false),
            result("stub://clip", true),
        ];
        let summary_path = writer.write_all(&results).unwrap();

        let video: serde_json::Value =
            serde_json::from_slice(&fs::read(out.join("yt-dQw4w9WgXcQ.json")).unwrap()).unwrap();
        assert_eq!(video["status"]["state"], "succeeded");
        assert_eq!(video["frames"][0]["timestamp_secs"], 0.0);
        assert_eq!(video["reference"]["kind"]["video_id"], "dQw4w9WgXcQ");

        let summary: serde_json::Value =
            serde_json::from_slice(&fs::read(summary_path).unwrap()).unwrap();
        assert_eq!(summary["project"], "demo");
        assert_eq!(summary["total"], 2);
        assert_eq!(summary["succeeded"], 1);
        assert_eq!(summary["failed"], 1);
        assert_eq!(summary["videos"][1]["status"]["kind"], "decode_error");
        let second = summary["videos"][1]["result_file"].as_str().unwrap();
        assert!(out.join(second).is_file());
    }

    #[test]
    fn repeated_slugs_get_distinct_files() {
        let mut used = HashSet::new();
        assert_eq!(unique_name("clip", &mut used), "clip.json");
        assert_eq!(unique_name("clip", &mut used), "clip-2.json");
        assert_eq!(unique_name("summary", &mut used), "summary-2.json");
    }
}
