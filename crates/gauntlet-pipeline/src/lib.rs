//! Gauntlet Pipeline
//!
//! Applies one function to every item of a lazily consumed source with at
//! most `K` items in flight, handing back `(item, result, error)` in the order
//! items finish.
//!
//! # Core Concepts
//!
//! - [`Pipeline`]: validated settings; [`Pipeline::run`] starts an iteration
//! - [`Completions`]: the iterator of finished items; owns the backend
//! - [`Backend`]: serial, thread, or process execution of one item
//! - [`Worker`] / [`ProcessWorker`]: what runs, in-process or out-of-process
//! - [`StopFlag`]: cooperative early stop shared with the caller
//!
//! # Example
//!
//! ```rust,ignore
//! use gauntlet_pipeline::prelude::*;
//!
//! let pipeline = Pipeline::new(PipelineConfig::default().with_max_in_flight(4))?;
//! let backend = ThreadBackend::new(|x: &u32| Ok::<_, WorkError>(x * 2));
//! for done in pipeline.run(0..10u32, backend) {
//!     let (item, result, error) = done.into_parts();
//! }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod backend;
mod error;
mod pipeline;
mod worker;

use std::any::Any;

#[cfg(unix)]
pub use backend::pid_is_running;
pub use backend::{
    Backend, BackendKind, Finished, PidLog, ProcessBackend, ProcessHandle, SerialBackend,
    Termination, ThreadBackend, Ticket, DEFAULT_TERMINATION_GRACE,
};
pub use error::{PipelineError, TerminationError, WorkError};
pub use pipeline::{
    default_concurrency, Completion, Completions, Pipeline, PipelineConfig, PipelineStats,
    StopFlag, DEFAULT_POLL_INTERVAL,
};
pub use worker::{
    serve_json, serve_json_with, JsonProcessWorker, ProcessOutput, ProcessWorker, Worker,
    WorkerReply,
};

/// Common imports
pub mod prelude {
    pub use crate::{
        Backend, BackendKind, Completion, JsonProcessWorker, Pipeline, PipelineConfig,
        ProcessBackend, SerialBackend, StopFlag, ThreadBackend, WorkError, Worker,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "worker panicked".to_string())
}
