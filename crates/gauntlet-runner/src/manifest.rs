//! Per-run result manifest, one JSON object per line

use crate::result::{AggregateResult, RunKey, RunRecord, Verdict};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Manifest file name inside the output directory
pub const MANIFEST_FILE: &str = "manifest.jsonl";

/// Coarse outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Passed
    Success,
    /// Failed validation
    Failed,
    /// Raised, timed out included
    Exception,
    /// Not validated
    NoValidation,
}

/// One line of the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRecord {
    /// Scenario identifier
    pub scenario_id: String,
    /// Repetition number
    pub run_number: u32,
    /// Coarse outcome
    pub status: RunStatus,
    /// 1.0 passed, 0.0 failed, absent when not validated
    pub score: Option<f64>,
    /// Where the trace was exported
    pub export_path: Option<String>,
    /// Exception category
    pub exception_kind: Option<String>,
    /// Exception detail
    pub exception_message: Option<String>,
    /// Wall time, in seconds
    pub duration_secs: f64,
    /// Configuration label
    pub config_tag: Option<String>,
    /// Served from the cache
    pub cached: bool,
    /// When the line was produced
    pub recorded_at: DateTime<Utc>,
}

impl ManifestRecord {
    /// Manifest line for one aggregated run
    #[must_use]
    pub fn from_run(key: &RunKey, record: &RunRecord, recorded_at: DateTime<Utc>) -> Self {
        let result = &record.result;
        let status = match (&result.exception, result.verdict) {
            (Some(_), _) => RunStatus::Exception,
            (None, Verdict::Success) => RunStatus::Success,
            (None, Verdict::Failure) => RunStatus::Failed,
            (None, Verdict::Unvalidated) => RunStatus::NoValidation,
        };
        let score = match result.verdict {
            Verdict::Success => Some(1.0),
            Verdict::Failure => Some(0.0),
            Verdict::Unvalidated => None,
        };
        Self {
            scenario_id: key.scenario_id.clone(),
            run_number: key.run_number,
            status,
            score,
            export_path: result.export_path.clone(),
            exception_kind: result.exception.as_ref().map(|e| e.kind.clone()),
            exception_message: result.exception.as_ref().map(|e| e.message.clone()),
            duration_secs: result.duration_secs,
            config_tag: record.config_tag.clone(),
            cached: record.cached,
            recorded_at,
        }
    }
}

/// Write the manifest for `aggregate` into `output_dir`, replacing any previous one
///
/// # Errors
/// Returns the I/O error and the path it happened at
pub fn write_manifest(output_dir: &Path, aggregate: &AggregateResult) -> Result<PathBuf, (PathBuf, io::Error)> {
    fs::create_dir_all(output_dir).map_err(|e| (output_dir.to_path_buf(), e))?;
    let path = output_dir.join(MANIFEST_FILE);
    let now = Utc::now();

    let write = || -> io::Result<()> {
        let mut out = BufWriter::new(File::create(&path)?);
        for (key, record) in aggregate.iter() {
            serde_json::to_writer(&mut out, &ManifestRecord::from_run(key, record, now))?;
            out.write_all(b"\n")?;
        }
        out.flush()
    };
    write().map_err(|e| (path.clone(), e))?;
    Ok(path)
}

/// Read a manifest back
///
/// # Errors
/// Returns an error for unreadable files or malformed lines
pub fn read_manifest(path: &Path) -> io::Result<Vec<ManifestRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        records.push(serde_json::from_str(&line)?);
    }
    Ok(records)
}
