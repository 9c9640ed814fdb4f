//! Worker process protocol
//!
//! The parent writes one [`WorkerRequest`] as a JSON line to the worker's
//! stdin; the worker runs the scenario and writes one reply line,
//! `{"ok": <RunResult>}` or `{"error": {"kind": .., "message": ..}}`, to
//! stdout. Anything else the worker prints before the reply is ignored.

use crate::config::RunnerConfig;
use crate::error::RunError;
use crate::result::RunResult;
use crate::runner::{RunContext, ScenarioRunner, WorkerCommand, WORKER_ENV};
use crate::scenario::{CompletedEvent, Scenario};
use gauntlet_pipeline::{serve_json_with, JsonProcessWorker, ProcessOutput, ProcessWorker, WorkError};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};
use std::process::Command;
use std::time::Instant;
use tracing::debug;

/// Everything a worker needs to execute one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Batch configuration
    pub config: RunnerConfig,
    /// Private copy of the scenario
    pub scenario: Scenario,
    /// Events to replay
    #[serde(default)]
    pub events: Option<Vec<CompletedEvent>>,
    /// Which repetition this is
    pub run_number: u32,
}

impl WorkerRequest {
    /// Execute the request with `runner`
    ///
    /// # Errors
    /// Returns the runner's error unchanged
    pub fn execute(&self, runner: &dyn ScenarioRunner) -> Result<RunResult, RunError> {
        let ctx = RunContext::new(&self.scenario.scenario_id, self.run_number);
        let _guard = ctx.span().clone().entered();
        run_timed(runner, &ctx, &self.config, &self.scenario, self.events.as_deref())
    }
}

/// Call `runner`, filling in the duration if it left it unset
pub(crate) fn run_timed(
    runner: &dyn ScenarioRunner,
    ctx: &RunContext,
    config: &RunnerConfig,
    scenario: &Scenario,
    events: Option<&[CompletedEvent]>,
) -> Result<RunResult, RunError> {
    let started = Instant::now();
    let mut result = runner.run(ctx, config, scenario, events)?;
    if result.duration_secs <= 0.0 {
        result.duration_secs = started.elapsed().as_secs_f64();
    }
    Ok(result)
}

pub(crate) fn to_work_error(err: RunError) -> WorkError {
    WorkError::Failed {
        kind: err.kind,
        message: err.message,
    }
}

/// Serve one request from `input`, replying on `output`
///
/// # Errors
/// Only stream I/O failures are returned
pub fn serve<In: BufRead, Out: Write>(runner: &dyn ScenarioRunner, input: In, output: Out) -> io::Result<()> {
    serve_json_with(input, output, |request: WorkerRequest| {
        debug!(scenario_id = %request.scenario.scenario_id, run_number = request.run_number, "worker request received");
        request.execute(runner).map_err(to_work_error)
    })
}

/// Serve one request on this process's stdin/stdout
///
/// # Errors
/// Only stream I/O failures are returned
pub fn serve_stdio(runner: &dyn ScenarioRunner) -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    serve(runner, stdin.lock(), stdout.lock())
}

/// Serve as a worker if `GAUNTLET_WORKER=1`
///
/// Returns `Ok(true)` when a request was served; the caller should then exit.
///
/// # Errors
/// Only stream I/O failures are returned
pub fn maybe_serve(runner: &dyn ScenarioRunner) -> io::Result<bool> {
    if std::env::var_os(WORKER_ENV).is_some_and(|v| v == "1") {
        serve_stdio(runner)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// A unit of work handed to the pipeline
#[derive(Debug, Clone)]
pub(crate) struct RunJob {
    pub(crate) scenario: Scenario,
    pub(crate) events: Option<Vec<CompletedEvent>>,
    pub(crate) run_number: u32,
    pub(crate) cache_key: Option<gauntlet_cache::CacheKey>,
    pub(crate) scenario_fingerprint: Option<gauntlet_cache::Fingerprint>,
}

/// Runs jobs by launching a worker process per job
pub(crate) struct SubprocessWorker {
    config: RunnerConfig,
    command: WorkerCommand,
    protocol: JsonProcessWorker<WorkerRequest, RunResult>,
}

impl SubprocessWorker {
    pub(crate) fn new(config: RunnerConfig, command: WorkerCommand) -> Self {
        let protocol = JsonProcessWorker::new(command.program.clone());
        Self {
            config,
            command,
            protocol,
        }
    }

    fn request(&self, job: &RunJob) -> WorkerRequest {
        WorkerRequest {
            config: self.config.clone(),
            scenario: job.scenario.clone(),
            events: job.events.clone(),
            run_number: job.run_number,
        }
    }
}

impl ProcessWorker<RunJob> for SubprocessWorker {
    type Output = RunResult;

    fn command(&self, _job: &RunJob) -> Command {
        self.command.to_command()
    }

    fn encode(&self, job: &RunJob) -> Result<Vec<u8>, WorkError> {
        self.protocol.encode(&self.request(job))
    }

    fn decode(&self, output: ProcessOutput) -> Result<RunResult, WorkError> {
        self.protocol.decode(output)
    }
}
