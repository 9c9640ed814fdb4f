//! File-per-key result store
//!
//! Each [`CacheKey`] maps to one JSON file under the cache root. A stored
//! record is only returned when both the configuration fingerprint and the
//! scenario fingerprint it was written with match the caller's.

use crate::error::{CacheError, Result};
use crate::fingerprint::Fingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable overriding the cache root
pub const CACHE_DIR_ENV: &str = "GAUNTLET_CACHE_DIR";

const RECORD_EXT: &str = "json";

/// Identity of one cached run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Scenario identifier
    pub scenario_id: String,
    /// Which repetition of the scenario
    pub run_number: u32,
    /// Fingerprint of the result-relevant configuration
    pub config_fingerprint: Fingerprint,
}

impl CacheKey {
    /// Build a key
    #[must_use]
    pub fn new(scenario_id: impl Into<String>, run_number: u32, config_fingerprint: Fingerprint) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            run_number,
            config_fingerprint,
        }
    }

    /// File name of this key's record
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}__run{}__{}.{RECORD_EXT}",
            sanitize(&self.scenario_id),
            self.run_number,
            self.config_fingerprint.short()
        )
    }
}

/// Replace anything but `[A-Za-z0-9._-]` so ids are safe as file names
fn sanitize(id: &str) -> String {
    let cleaned: String = id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        format!("_{cleaned}")
    } else {
        cleaned
    }
}

/// A stored run outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    /// Which run this is
    pub key: CacheKey,
    /// `Some(true)` passed, `Some(false)` failed, `None` not validated
    pub success: Option<bool>,
    /// Exception category, if the run raised
    pub exception_kind: Option<String>,
    /// Exception detail
    pub exception_message: Option<String>,
    /// Where the run's trace was exported
    pub export_path: Option<String>,
    /// Validator explanation
    pub rationale: Option<String>,
    /// Fingerprint of the scenario content the run used
    pub scenario_fingerprint: Fingerprint,
    /// Wall time of the original run, in seconds
    pub duration_secs: f64,
    /// When the record was written
    pub written_at: DateTime<Utc>,
}

impl CachedResult {
    /// Record with no outcome yet, stamped now
    #[must_use]
    pub fn new(key: CacheKey, scenario_fingerprint: Fingerprint) -> Self {
        Self {
            key,
            success: None,
            exception_kind: None,
            exception_message: None,
            export_path: None,
            rationale: None,
            scenario_fingerprint,
            duration_secs: 0.0,
            written_at: Utc::now(),
        }
    }

    /// Set the verdict
    #[inline]
    #[must_use]
    pub fn with_success(mut self, success: Option<bool>) -> Self {
        self.success = success;
        self
    }

    /// Set the exception
    #[must_use]
    pub fn with_exception(mut self, kind: impl Into<String>, message: impl Into<String>) -> Self {
        self.exception_kind = Some(kind.into());
        self.exception_message = Some(message.into());
        self
    }

    /// Set the export pointer
    #[inline]
    #[must_use]
    pub fn with_export_path(mut self, path: Option<String>) -> Self {
        self.export_path = path;
        self
    }

    /// Set the rationale
    #[inline]
    #[must_use]
    pub fn with_rationale(mut self, rationale: Option<String>) -> Self {
        self.rationale = rationale;
        self
    }

    /// Set the duration
    #[inline]
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_secs = duration.as_secs_f64();
        self
    }

    /// Duration of the original run
    #[must_use]
    pub fn duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.duration_secs).unwrap_or_default()
    }
}

/// Directory of cached run results
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
}

impl ResultCache {
    /// Cache rooted at `root`; the directory is created on first write
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache rooted at `$GAUNTLET_CACHE_DIR`, or `default_root` if unset or empty
    #[must_use]
    pub fn from_env(default_root: impl Into<PathBuf>) -> Self {
        match std::env::var_os(CACHE_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(dir),
            _ => Self::new(default_root),
        }
    }

    /// Cache root directory
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File backing `key`
    #[must_use]
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// Stored result for `key`, if it was written with the same scenario
    ///
    /// Missing, unreadable, and stale records are all misses.
    #[must_use]
    pub fn lookup(&self, key: &CacheKey, scenario_fingerprint: &Fingerprint) -> Option<CachedResult> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cache record unreadable");
                return None;
            }
        };
        let record: CachedResult = match serde_json::from_slice(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "cache record corrupt");
                return None;
            }
        };

        if record.key != *key {
            debug!(scenario_id = %key.scenario_id, run_number = key.run_number, "cache record belongs to another key");
            return None;
        }
        if record.scenario_fingerprint != *scenario_fingerprint {
            debug!(scenario_id = %key.scenario_id, run_number = key.run_number, "cache record stale: scenario changed");
            return None;
        }
        debug!(scenario_id = %key.scenario_id, run_number = key.run_number, "cache hit");
        Some(record)
    }

    /// Write `record`, logging and swallowing any failure
    pub fn store(&self, record: &CachedResult) {
        if let Err(e) = self.try_store(record) {
            warn!(
                scenario_id = %record.key.scenario_id,
                run_number = record.key.run_number,
                error = %e,
                "failed to write cache record"
            );
        }
    }

    /// Write `record` atomically, replacing any previous record for its key
    ///
    /// # Errors
    /// Returns [`CacheError`] if the record cannot be encoded or written
    pub fn try_store(&self, record: &CachedResult) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&self.root, e))?;

        let path = self.path_for(&record.key);
        let mut tmp = tempfile::Builder::new()
            .prefix(".tmp_")
            .tempfile_in(&self.root)
            .map_err(|e| CacheError::io(&self.root, e))?;
        tmp.write_all(&bytes).map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.as_file().sync_all().map_err(|e| CacheError::io(tmp.path(), e))?;
        tmp.persist(&path).map_err(|e| CacheError::io(&path, e.error))?;

        debug!(path = %path.display(), "cache record written");
        Ok(())
    }

    /// Remove one record; returns whether it existed
    ///
    /// # Errors
    /// Returns [`CacheError`] for failures other than the file being absent
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(CacheError::io(path, e)),
        }
    }

    /// Remove every record; returns how many were removed
    ///
    /// # Errors
    /// Returns [`CacheError`] if the directory cannot be listed or a record
    /// cannot be removed
    pub fn clear(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(CacheError::io(&self.root, e)),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry.map_err(|e| CacheError::io(&self.root, e))?.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXT) {
                fs::remove_file(&path).map_err(|e| CacheError::io(&path, e))?;
                removed += 1;
            }
        }
        debug!(root = %self.root.display(), removed, "cache cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(id: &str) -> CacheKey {
        CacheKey::new(id, 1, Fingerprint::of_bytes(b"config"))
    }

    #[test]
    fn file_name_layout() {
        let k = key("scenario_42");
        let name = k.file_name();
        assert!(name.starts_with("scenario_42__run1__"));
        assert!(name.ends_with(".json"));
        assert_eq!(name.len(), "scenario_42__run1__".len() + 16 + ".json".len());
    }

    #[test]
    fn sanitizes_unsafe_ids() {
        assert_eq!(sanitize("a/b\\c d"), "a_b_c_d");
        assert_eq!(sanitize(".."), "_..");
        assert_eq!(sanitize(""), "_");
        assert_eq!(sanitize("ok-id_1.v2"), "ok-id_1.v2");
    }

    #[test]
    fn builder_fills_fields() {
        let record = CachedResult::new(key("s"), Fingerprint::of_bytes(b"s"))
            .with_success(Some(false))
            .with_exception("Timeout", "too slow")
            .with_duration(Duration::from_millis(1500));
        assert_eq!(record.success, Some(false));
        assert_eq!(record.exception_kind.as_deref(), Some("Timeout"));
        assert_eq!(record.duration(), Duration::from_millis(1500));
    }
}
