//! Execution backends
//!
//! A backend decides how one item is executed. The pipeline only talks to
//! the [`Backend`] trait: submit an item, poll for finished ones, cancel one
//! that ran out of time, shut everything down.
//!
//! | Backend | Isolation | On timeout |
//! |---|---|---|
//! | [`SerialBackend`] | none, runs inline | reported after the call returns |
//! | [`ThreadBackend`] | OS thread | thread abandoned, late result discarded |
//! | [`ProcessBackend`] | OS process group | SIGTERM, grace, SIGKILL, reap |

mod process;
mod serial;
mod thread;

pub use process::{PidLog, ProcessBackend, ProcessHandle, Termination, DEFAULT_TERMINATION_GRACE};
#[cfg(unix)]
pub use process::pid_is_running;
pub use serial::SerialBackend;
pub use thread::ThreadBackend;

use crate::error::WorkError;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::time::Duration;

/// Identifies one submitted item for its whole life in a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(pub(crate) u64);

impl Ticket {
    /// Raw ticket number
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl Display for Ticket {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Concurrency strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Inline, one at a time
    Serial,
    /// One OS thread per item
    #[default]
    Thread,
    /// One OS process per item
    Process,
}

impl BackendKind {
    /// Lower-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Serial => "serial",
            Self::Thread => "thread",
            Self::Process => "process",
        }
    }
}

impl Display for BackendKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Finished item reported by [`Backend::poll`]
pub type Finished<R> = (Ticket, Result<R, WorkError>);

/// How items are executed
pub trait Backend<T, R> {
    /// Which strategy this is
    fn kind(&self) -> BackendKind;

    /// Whether `submit` runs the item to completion before returning
    fn is_inline(&self) -> bool {
        false
    }

    /// Start one item. `timeout` is advisory; backends that cannot be
    /// preempted use it to report overruns themselves.
    ///
    /// # Errors
    /// Returns an error if the item could not be started at all
    fn submit(&mut self, ticket: Ticket, item: &T, timeout: Option<Duration>) -> Result<(), WorkError>;

    /// Collect finished items, waiting up to `wait` if none are ready
    fn poll(&mut self, wait: Duration) -> Vec<Finished<R>>;

    /// Report items whose work already ended but whose result was not yet
    /// collectable; called once before [`shutdown`](Self::shutdown) and may
    /// block briefly
    fn flush(&mut self) -> Vec<Finished<R>> {
        Vec::new()
    }

    /// Give up on an in-flight item; its result must never be reported
    fn cancel(&mut self, ticket: Ticket);

    /// Give up on every in-flight item
    fn shutdown(&mut self);

    /// Number of items currently running
    fn in_flight(&self) -> usize;
}
