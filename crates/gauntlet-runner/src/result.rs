//! Run outcomes and their aggregation

use gauntlet_cache::CachedResult;
use gauntlet_pipeline::WorkError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Exception kind recorded when a run exceeds its time budget
pub const TIMEOUT_KIND: &str = "Timeout";

/// Whether a run passed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Validated and passed
    Success,
    /// Validated and failed, or crashed
    Failure,
    /// Finished without validation
    Unvalidated,
}

impl Verdict {
    /// Tri-state form used by the cache
    #[must_use]
    pub const fn as_option(self) -> Option<bool> {
        match self {
            Self::Success => Some(true),
            Self::Failure => Some(false),
            Self::Unvalidated => None,
        }
    }

    /// Inverse of [`as_option`](Self::as_option)
    #[must_use]
    pub const fn from_option(success: Option<bool>) -> Self {
        match success {
            Some(true) => Self::Success,
            Some(false) => Self::Failure,
            None => Self::Unvalidated,
        }
    }
}

/// An exception raised during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunException {
    /// Category, e.g. `Timeout` or `ValueError`
    pub kind: String,
    /// Detail
    pub message: String,
}

/// Outcome of one scenario run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    /// Validation outcome
    pub verdict: Verdict,
    /// Exception raised, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<RunException>,
    /// Validator explanation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
    /// Where the run's trace was exported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<String>,
    /// Wall time, in seconds
    #[serde(default)]
    pub duration_secs: f64,
}

impl RunResult {
    fn with_verdict(verdict: Verdict) -> Self {
        Self {
            verdict,
            exception: None,
            rationale: None,
            export_path: None,
            duration_secs: 0.0,
        }
    }

    /// Passed
    #[must_use]
    pub fn success() -> Self {
        Self::with_verdict(Verdict::Success)
    }

    /// Failed validation
    #[must_use]
    pub fn failure() -> Self {
        Self::with_verdict(Verdict::Failure)
    }

    /// Finished without validation
    #[must_use]
    pub fn unvalidated() -> Self {
        Self::with_verdict(Verdict::Unvalidated)
    }

    /// Failed with an exception
    #[must_use]
    pub fn exception(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception: Some(RunException {
                kind: kind.into(),
                message: message.into(),
            }),
            ..Self::failure()
        }
    }

    /// Normalize a pipeline error into a failed run
    #[must_use]
    pub fn from_work_error(error: &WorkError, elapsed: Duration) -> Self {
        let result = match error {
            WorkError::TimedOut(after) => Self::exception(
                TIMEOUT_KIND,
                format!("scenario timed out after {:.1}s", after.as_secs_f64()),
            ),
            WorkError::Failed { kind, message } => Self::exception(kind.clone(), message.clone()),
            other => Self::exception(other.kind(), other.to_string()),
        };
        result.with_duration(elapsed)
    }

    /// Set the rationale
    #[must_use]
    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(rationale.into());
        self
    }

    /// Set the export pointer
    #[must_use]
    pub fn with_export_path(mut self, path: impl Into<String>) -> Self {
        self.export_path = Some(path.into());
        self
    }

    /// Set the duration
    #[inline]
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = duration.as_secs_f64();
        self
    }

    /// Whether the run passed
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }

    /// Whether the run exceeded its time budget
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.exception.as_ref().is_some_and(|e| e.kind == TIMEOUT_KIND)
    }

    /// Rebuild from a cache record
    #[must_use]
    pub fn from_cached(cached: &CachedResult) -> Self {
        let exception = cached.exception_kind.as_ref().map(|kind| RunException {
            kind: kind.clone(),
            message: cached.exception_message.clone().unwrap_or_default(),
        });
        Self {
            verdict: Verdict::from_option(cached.success),
            exception,
            rationale: cached.rationale.clone(),
            export_path: cached.export_path.clone(),
            duration_secs: cached.duration_secs,
        }
    }
}

/// Identity of one run within a batch
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunKey {
    /// Scenario identifier
    pub scenario_id: String,
    /// Repetition number, starting at 1
    pub run_number: u32,
}

impl RunKey {
    /// Build a key
    #[must_use]
    pub fn new(scenario_id: impl Into<String>, run_number: u32) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            run_number,
        }
    }
}

impl Display for RunKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scenario_id, self.run_number)
    }
}

/// A run's result plus where it came from
#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    /// The outcome
    pub result: RunResult,
    /// Configuration label for grouping
    pub config_tag: Option<String>,
    /// Served from the cache instead of executed
    pub cached: bool,
}

/// Successes out of runs for one configuration tag
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagSummary {
    /// Runs with this tag
    pub runs: usize,
    /// Of which passed
    pub successes: usize,
}

/// All outcomes of a batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateResult {
    runs: BTreeMap<RunKey, RunRecord>,
    success_count: usize,
    failed_count: usize,
    unvalidated_count: usize,
    exception_count: usize,
    cached_count: usize,
    load_errors: usize,
    total_duration_secs: f64,
    manifest_path: Option<PathBuf>,
    manifest_error: Option<String>,
}

impl AggregateResult {
    /// Empty aggregate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold in one run; a repeated key replaces the earlier record
    pub fn record(&mut self, key: RunKey, record: RunRecord) {
        self.count(&record, true);
        if let Some(previous) = self.runs.insert(key, record) {
            self.count(&previous, false);
        }
    }

    /// Note a scenario that failed to load
    pub fn record_load_error(&mut self) {
        self.load_errors += 1;
    }

    fn count(&mut self, record: &RunRecord, add: bool) {
        let bump = |n: &mut usize| {
            if add {
                *n += 1;
            } else {
                *n = n.saturating_sub(1);
            }
        };
        match record.result.verdict {
            Verdict::Success => bump(&mut self.success_count),
            Verdict::Failure => bump(&mut self.failed_count),
            Verdict::Unvalidated => bump(&mut self.unvalidated_count),
        }
        if record.result.exception.is_some() {
            bump(&mut self.exception_count);
        }
        if record.cached {
            bump(&mut self.cached_count);
        }
        if add {
            self.total_duration_secs += record.result.duration_secs;
        } else {
            self.total_duration_secs -= record.result.duration_secs;
        }
    }

    /// Runs recorded
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.runs.len()
    }

    /// Whether nothing was recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Record of one run
    #[must_use]
    pub fn get(&self, scenario_id: &str, run_number: u32) -> Option<&RunRecord> {
        self.runs.get(&RunKey::new(scenario_id, run_number))
    }

    /// All runs, ordered by scenario id then run number
    pub fn iter(&self) -> impl Iterator<Item = (&RunKey, &RunRecord)> {
        self.runs.iter()
    }

    /// Passed runs
    #[inline]
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.success_count
    }

    /// Failed runs, exceptions and timeouts included
    #[inline]
    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    /// Runs without validation
    #[inline]
    #[must_use]
    pub fn unvalidated_count(&self) -> usize {
        self.unvalidated_count
    }

    /// Runs that raised
    #[inline]
    #[must_use]
    pub fn exception_count(&self) -> usize {
        self.exception_count
    }

    /// Runs served from the cache
    #[inline]
    #[must_use]
    pub fn cached_count(&self) -> usize {
        self.cached_count
    }

    /// Scenarios that failed to load
    #[inline]
    #[must_use]
    pub fn load_errors(&self) -> usize {
        self.load_errors
    }

    /// Sum of run durations
    #[must_use]
    pub fn total_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.total_duration_secs.max(0.0)).unwrap_or_default()
    }

    /// Passed share of validated runs, 0.0 when none were validated
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        let validated = self.success_count + self.failed_count;
        if validated == 0 {
            0.0
        } else {
            self.success_count as f64 / validated as f64
        }
    }

    /// Where the manifest was written
    #[must_use]
    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref()
    }

    /// Why the manifest could not be written
    #[must_use]
    pub fn manifest_error(&self) -> Option<&str> {
        self.manifest_error.as_deref()
    }

    pub(crate) fn set_manifest(&mut self, outcome: Result<PathBuf, String>) {
        match outcome {
            Ok(path) => self.manifest_path = Some(path),
            Err(e) => self.manifest_error = Some(e),
        }
    }

    /// Runs and successes per configuration tag
    #[must_use]
    pub fn by_config_tag(&self) -> BTreeMap<String, TagSummary> {
        let mut summary: BTreeMap<String, TagSummary> = BTreeMap::new();
        for record in self.runs.values() {
            let entry = summary
                .entry(record.config_tag.clone().unwrap_or_default())
                .or_default();
            entry.runs += 1;
            if record.result.is_success() {
                entry.successes += 1;
            }
        }
        summary
    }
}
