//! Error types for the orchestrator
//!
//! - [`OrchestratorError`]: batch-level failures; the only ones `run_all` returns
//! - [`RunError`]: a scenario callback failed; becomes data in the run's result
//! - [`SourceError`]: one scenario could not be loaded; counted, never fatal
//! - [`ConfigError`]: configuration could not be read or is inconsistent

use crate::config::ConfigIssue;
use crate::result::AggregateResult;
use gauntlet_pipeline::{BackendKind, PipelineError};
use std::path::PathBuf;

/// Batch-level failure
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Not a single run was processed
    #[error("no scenarios were processed")]
    NoScenarios,

    /// Stopped early; `partial` holds the runs that finished
    #[error("run interrupted after {} completed runs", .partial.len())]
    Interrupted {
        /// Results gathered before the stop
        partial: Box<AggregateResult>,
    },

    /// Bad configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The runner cannot be driven by the configured backend
    #[error("backend `{backend}` cannot drive a {runner} runner")]
    BackendMismatch {
        /// Configured backend
        backend: BackendKind,
        /// Kind of runner supplied
        runner: &'static str,
    },

    /// Pipeline settings were rejected
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// The background batch task died
    #[error("batch task failed: {0}")]
    Task(String),
}

impl OrchestratorError {
    /// Partial results carried by an interruption
    #[must_use]
    pub fn partial(&self) -> Option<&AggregateResult> {
        match self {
            Self::Interrupted { partial } => Some(partial),
            _ => None,
        }
    }
}

/// A scenario callback failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct RunError {
    /// Exception category, e.g. `ValueError`
    pub kind: String,
    /// Detail
    pub message: String,
}

impl RunError {
    /// Build an error of the given kind
    #[must_use]
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// A scenario could not be produced by its source
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to load scenario{}: {message}", .scenario_id.as_deref().map(|id| format!(" `{id}`")).unwrap_or_default())]
pub struct SourceError {
    /// Scenario id, when known
    pub scenario_id: Option<String>,
    /// Detail
    pub message: String,
}

impl SourceError {
    /// Failure with no known scenario id
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            scenario_id: None,
            message: message.into(),
        }
    }

    /// Failure for a known scenario
    #[must_use]
    pub fn for_scenario(scenario_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            scenario_id: Some(scenario_id.into()),
            message: message.into(),
        }
    }
}

/// Configuration could not be loaded or is invalid
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File unreadable
    #[error("failed to read config file at {path}: {source}")]
    Read {
        /// Config file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Parsed, but inconsistent
    #[error("invalid configuration: {}", .issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    Invalid {
        /// Every problem found
        issues: Vec<ConfigIssue>,
    },

    /// The result-relevant settings could not be fingerprinted
    #[error("failed to fingerprint configuration: {0}")]
    Fingerprint(#[from] gauntlet_cache::FingerprintError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_error_display() {
        assert_eq!(SourceError::new("bad json").to_string(), "failed to load scenario: bad json");
        assert_eq!(
            SourceError::for_scenario("s1", "missing events").to_string(),
            "failed to load scenario `s1`: missing events"
        );
    }

    #[test]
    fn run_error_display() {
        assert_eq!(RunError::new("KeyError", "x").to_string(), "KeyError: x");
    }

    #[test]
    fn interrupted_exposes_partial() {
        let err = OrchestratorError::Interrupted {
            partial: Box::default(),
        };
        assert_eq!(err.partial().map(AggregateResult::len), Some(0));
        assert!(OrchestratorError::NoScenarios.partial().is_none());
    }
}
