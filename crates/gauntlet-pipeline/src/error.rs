//! Error types for the execution pipeline
//!
//! - [`WorkError`]: why one item produced no result; carried as data in a
//!   [`Completion`](crate::Completion), never raised out of the pipeline
//! - [`PipelineError`]: invalid pipeline configuration
//! - [`TerminationError`]: a process could not be stopped; logged only

use std::time::Duration;

/// Why a single item failed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkError {
    /// The worker returned an error
    #[error("{kind}: {message}")]
    Failed {
        /// Error category reported by the worker
        kind: String,
        /// Human-readable detail
        message: String,
    },

    /// The worker panicked
    #[error("worker panicked: {0}")]
    Panicked(String),

    /// The item exceeded its time budget
    #[error("timed out after {:.1}s", .0.as_secs_f64())]
    TimedOut(Duration),

    /// The worker could not be started
    #[error("failed to start worker: {0}")]
    Spawn(String),

    /// A worker process answered with something unreadable
    #[error("worker protocol error: {0}")]
    Protocol(String),

    /// A worker process exited unsuccessfully
    #[error("worker process exited with {}: {stderr}", code.map_or_else(|| "signal".to_owned(), |c| format!("code {c}")))]
    ProcessExit {
        /// Exit code, absent when killed by a signal
        code: Option<i32>,
        /// Tail of the process's stderr
        stderr: String,
    },

    /// Cancelled before finishing (shutdown or stop request)
    #[error("cancelled")]
    Cancelled,
}

impl WorkError {
    /// Convenience constructor for worker-reported failures
    #[must_use]
    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Check if the item ran out of time
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_))
    }

    /// Short category name, suitable for grouping in reports
    #[must_use]
    pub fn kind(&self) -> &str {
        match self {
            Self::Failed { kind, .. } => kind,
            Self::Panicked(_) => "Panic",
            Self::TimedOut(_) => "Timeout",
            Self::Spawn(_) => "SpawnFailure",
            Self::Protocol(_) => "ProtocolError",
            Self::ProcessExit { .. } => "ProcessExit",
            Self::Cancelled => "Cancelled",
        }
    }
}

/// Invalid pipeline setup
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PipelineError {
    /// At least one item must be allowed in flight
    #[error("max_in_flight must be at least 1")]
    ZeroConcurrency,

    /// Poll interval must be non-zero
    #[error("poll interval must be non-zero")]
    ZeroPollInterval,
}

/// A worker process could not be stopped and reaped
#[derive(Debug, thiserror::Error)]
#[error("failed to terminate process {pid}: {source}")]
pub struct TerminationError {
    /// Process id
    pub pid: u32,
    /// Underlying OS error
    #[source]
    pub source: std::io::Error,
}
