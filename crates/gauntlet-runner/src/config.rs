//! Runner configuration
//!
//! Loaded from TOML; every field has a default so an empty file is valid.
//! Only `model`, `agent`, `max_scenario_duration_secs` and `max_turns`
//! influence results, so only they feed the cache fingerprint.

use crate::error::ConfigError;
use chrono::Utc;
use gauntlet_cache::{Fingerprint, ResultCache};
use gauntlet_pipeline::{default_concurrency, BackendKind, PipelineConfig, DEFAULT_TERMINATION_GRACE};
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides [`default_output_root`]
pub const OUTPUT_DIR_ENV: &str = "GAUNTLET_OUTPUT_DIR";

/// Log output style
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Settings for a batch of scenario runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Model identifier, opaque to the orchestrator
    pub model: String,
    /// Agent identifier, opaque to the orchestrator
    pub agent: String,
    /// Runs executing at once
    pub max_concurrent_scenarios: usize,
    /// Per-run wall-clock budget; unset means unlimited
    pub per_scenario_timeout_secs: Option<f64>,
    /// How runs are executed
    pub executor_backend: BackendKind,
    /// Reuse results of unchanged runs
    pub enable_caching: bool,
    /// Cache root; `GAUNTLET_CACHE_DIR` takes precedence
    pub cache_dir: Option<PathBuf>,
    /// Where the manifest is written; unset means a fresh directory per batch
    /// under [`default_output_root`]
    pub output_dir: Option<PathBuf>,
    /// Repetitions of every scenario
    pub runs_per_scenario: u32,
    /// Simulated-time cap handed to the runner
    pub max_scenario_duration_secs: Option<f64>,
    /// Turn cap handed to the runner
    pub max_turns: Option<usize>,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Log output style
    pub log_format: LogFormat,
    /// Longest single wait of the pipeline's poll loop
    pub poll_interval_ms: u64,
    /// SIGTERM to SIGKILL grace for worker processes
    pub termination_grace_ms: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            model: "default".to_owned(),
            agent: "default".to_owned(),
            max_concurrent_scenarios: default_concurrency(),
            per_scenario_timeout_secs: None,
            executor_backend: BackendKind::Thread,
            enable_caching: false,
            cache_dir: None,
            output_dir: None,
            runs_per_scenario: 1,
            max_scenario_duration_secs: None,
            max_turns: None,
            log_level: "info".to_owned(),
            log_format: LogFormat::Text,
            poll_interval_ms: 20,
            termination_grace_ms: u64::try_from(DEFAULT_TERMINATION_GRACE.as_millis()).unwrap_or(500),
        }
    }
}

/// One problem found by [`RunnerConfig::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Offending field
    pub field: &'static str,
    /// What is wrong with it
    pub message: String,
}

impl ConfigIssue {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl Display for ConfigIssue {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The settings that change what a run produces
#[derive(Serialize)]
struct ResultRelevant<'a> {
    model: &'a str,
    agent: &'a str,
    max_scenario_duration_secs: Option<f64>,
    max_turns: Option<usize>,
}

impl RunnerConfig {
    /// Parse TOML
    ///
    /// # Errors
    /// Returns [`ConfigError::Parse`] for malformed input
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Read and parse a TOML file
    ///
    /// # Errors
    /// Returns [`ConfigError`] if the file cannot be read or parsed
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let body = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&body)
    }

    /// Every inconsistency in the settings; empty means valid
    #[must_use]
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        if self.max_concurrent_scenarios == 0 {
            issues.push(ConfigIssue::new("max_concurrent_scenarios", "must be at least 1"));
        }
        if self.runs_per_scenario == 0 {
            issues.push(ConfigIssue::new("runs_per_scenario", "must be at least 1"));
        }
        if let Some(t) = self.per_scenario_timeout_secs {
            if !t.is_finite() || t <= 0.0 {
                issues.push(ConfigIssue::new(
                    "per_scenario_timeout_secs",
                    format!("must be a positive number of seconds, got {t}"),
                ));
            } else if Duration::try_from_secs_f64(t).is_err() {
                issues.push(ConfigIssue::new(
                    "per_scenario_timeout_secs",
                    format!("{t} seconds is too large for a timeout"),
                ));
            }
        }
        if let Some(d) = self.max_scenario_duration_secs {
            if !d.is_finite() || d < 0.0 {
                issues.push(ConfigIssue::new(
                    "max_scenario_duration_secs",
                    format!("must be non-negative, got {d}"),
                ));
            }
        }
        if self.poll_interval_ms == 0 {
            issues.push(ConfigIssue::new("poll_interval_ms", "must be at least 1"));
        }
        if self.model.trim().is_empty() {
            issues.push(ConfigIssue::new("model", "must not be empty"));
        }
        if self.agent.trim().is_empty() {
            issues.push(ConfigIssue::new("agent", "must not be empty"));
        }
        issues
    }

    /// [`validate`](Self::validate), as an error
    ///
    /// # Errors
    /// Returns [`ConfigError::Invalid`] listing every issue
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { issues })
        }
    }

    /// Fingerprint of the result-relevant settings
    ///
    /// # Errors
    /// Returns [`ConfigError::Fingerprint`] if hashing fails
    pub fn fingerprint(&self) -> Result<Fingerprint, ConfigError> {
        Ok(Fingerprint::of_json(&ResultRelevant {
            model: &self.model,
            agent: &self.agent,
            max_scenario_duration_secs: self.max_scenario_duration_secs,
            max_turns: self.max_turns,
        })?)
    }

    /// Label used to group results by configuration
    #[must_use]
    pub fn config_tag(&self) -> String {
        format!("{}/{}", self.model, self.agent)
    }

    /// Per-run timeout
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.per_scenario_timeout_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Manifest directory for a batch starting now
    #[must_use]
    pub fn batch_output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| {
            default_output_root().join(Utc::now().format("%Y%m%dT%H%M%S%.6fZ").to_string())
        })
    }

    /// Process termination grace period
    #[inline]
    #[must_use]
    pub fn termination_grace(&self) -> Duration {
        Duration::from_millis(self.termination_grace_ms)
    }

    /// Pipeline settings derived from this configuration
    #[must_use]
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_max_in_flight(self.max_concurrent_scenarios)
            .with_timeout(self.timeout())
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
    }

    /// Result cache, if caching is enabled
    #[must_use]
    pub fn result_cache(&self) -> Option<ResultCache> {
        self.enable_caching.then(|| {
            ResultCache::from_env(self.cache_dir.clone().unwrap_or_else(default_cache_dir))
        })
    }
}

/// `$HOME/.cache/gauntlet/results`, or under the temp dir without a home
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(".cache")
        .join("gauntlet")
        .join("results")
}

/// Parent of per-batch manifest directories
///
/// `GAUNTLET_OUTPUT_DIR` when set, else `$HOME/.cache/gauntlet/runs`
#[must_use]
pub fn default_output_root() -> PathBuf {
    if let Some(dir) = std::env::var_os(OUTPUT_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map_or_else(std::env::temp_dir, PathBuf::from)
        .join(".cache")
        .join("gauntlet")
        .join("runs")
}
