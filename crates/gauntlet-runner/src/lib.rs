//! Gauntlet Runner
//!
//! Runs batches of scenarios: each scenario is expanded into its runs,
//! answered from the result cache when possible, and otherwise executed on
//! the configured pipeline backend. Outcomes are aggregated per
//! `(scenario_id, run_number)` and written to a manifest.
//!
//! # Core Concepts
//!
//! - [`RunnerConfig`]: batch settings, loadable from TOML
//! - [`Scenario`] / [`ScenarioSource`]: what to run, pulled lazily
//! - [`ScenarioRunner`]: the callback that runs one scenario
//! - [`RunnerHandle`]: reach the runner in-process or through a worker process
//! - [`ScenarioOrchestrator`]: runs a whole batch, honouring interrupts
//! - [`AggregateResult`]: per-run outcomes and summary counts
//!
//! # Example
//!
//! ```rust,ignore
//! use gauntlet_runner::prelude::*;
//!
//! let config = RunnerConfig::load("gauntlet.toml")?;
//! let runner = RunnerHandle::in_process(|_: &RunContext, _: &RunnerConfig, s: &Scenario, _: Option<&[CompletedEvent]>| {
//!     Ok::<_, RunError>(RunResult::success().with_rationale(format!("ran {}", s.scenario_id)))
//! });
//! let orchestrator = ScenarioOrchestrator::new(config, runner)?;
//! let mut source = IterSource::from_scenarios(scenarios);
//! let results = orchestrator.run_all(&mut source, &StopHandle::new())?;
//! println!("{:.1}% passed", results.success_rate() * 100.0);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod config;
mod error;
pub mod logging;
mod manifest;
mod orchestrator;
mod result;
mod runner;
mod scenario;
pub mod worker;

pub use config::{default_cache_dir, default_output_root, ConfigIssue, LogFormat, RunnerConfig, OUTPUT_DIR_ENV};
pub use error::{ConfigError, OrchestratorError, RunError, SourceError};
pub use logging::{init_from_config, init_tracing, init_tracing_with};
pub use manifest::{read_manifest, write_manifest, ManifestRecord, RunStatus, MANIFEST_FILE};
pub use orchestrator::{ScenarioOrchestrator, StopHandle};
pub use result::{
    AggregateResult, RunException, RunKey, RunRecord, RunResult, TagSummary, Verdict, TIMEOUT_KIND,
};
pub use runner::{RunContext, RunnerHandle, ScenarioRunner, WorkerCommand, WORKER_ENV};
pub use scenario::{CompletedEvent, IterSource, Scenario, ScenarioItem, ScenarioSource};
pub use worker::WorkerRequest;

pub use gauntlet_pipeline::BackendKind;

/// Common imports
pub mod prelude {
    pub use crate::{
        AggregateResult, BackendKind, CompletedEvent, IterSource, OrchestratorError, RunContext,
        RunError, RunResult, RunnerConfig, RunnerHandle, Scenario, ScenarioOrchestrator,
        ScenarioRunner, ScenarioSource, StopHandle, Verdict,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
