//! The run-one-scenario callback and how it is reached
//!
//! A [`ScenarioRunner`] executes one scenario. The orchestrator either calls
//! it directly ([`RunnerHandle::InProcess`], for the serial and thread
//! backends) or launches a worker process that calls it
//! ([`RunnerHandle::Subprocess`], for the process backend).

use crate::config::RunnerConfig;
use crate::error::RunError;
use crate::result::RunResult;
use crate::scenario::{CompletedEvent, Scenario};
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::Span;

/// Environment variable that makes a binary serve as a worker
pub const WORKER_ENV: &str = "GAUNTLET_WORKER";

/// Identity and tracing span of the run being executed
#[derive(Debug, Clone)]
pub struct RunContext {
    scenario_id: String,
    run_number: u32,
    span: Span,
}

impl RunContext {
    /// Context for one run, with a fresh `scenario_run` span
    #[must_use]
    pub fn new(scenario_id: impl Into<String>, run_number: u32) -> Self {
        let scenario_id = scenario_id.into();
        let span = tracing::info_span!("scenario_run", scenario_id = %scenario_id, run_number);
        Self {
            scenario_id,
            run_number,
            span,
        }
    }

    /// Scenario being run
    #[inline]
    #[must_use]
    pub fn scenario_id(&self) -> &str {
        &self.scenario_id
    }

    /// Repetition number
    #[inline]
    #[must_use]
    pub fn run_number(&self) -> u32 {
        self.run_number
    }

    /// Span every log line of this run belongs to
    #[inline]
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }
}

/// Executes one scenario run
pub trait ScenarioRunner: Send + Sync + 'static {
    /// Run `scenario`, replaying `events` when given
    ///
    /// # Errors
    /// Any error is recorded as a failed run with the error's kind
    fn run(
        &self,
        ctx: &RunContext,
        config: &RunnerConfig,
        scenario: &Scenario,
        events: Option<&[CompletedEvent]>,
    ) -> Result<RunResult, RunError>;
}

impl<F> ScenarioRunner for F
where
    F: Fn(&RunContext, &RunnerConfig, &Scenario, Option<&[CompletedEvent]>) -> Result<RunResult, RunError>
        + Send
        + Sync
        + 'static,
{
    fn run(
        &self,
        ctx: &RunContext,
        config: &RunnerConfig,
        scenario: &Scenario,
        events: Option<&[CompletedEvent]>,
    ) -> Result<RunResult, RunError> {
        self(ctx, config, scenario, events)
    }
}

/// Program launched once per run by the process backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable
    pub program: OsString,
    /// Arguments
    pub args: Vec<OsString>,
    /// Extra environment
    pub envs: Vec<(OsString, OsString)>,
    /// Working directory
    pub current_dir: Option<PathBuf>,
}

impl WorkerCommand {
    /// Command running `program`
    #[must_use]
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
        }
    }

    /// Re-launch the current executable in worker mode
    ///
    /// The binary must call [`maybe_serve`](crate::worker::maybe_serve) early in `main`.
    ///
    /// # Errors
    /// Returns an error if the current executable cannot be located
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).env(WORKER_ENV, "1"))
    }

    /// Append an argument
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable
    #[must_use]
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Set the working directory
    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// The process to spawn; stdio is left to the caller
    #[must_use]
    pub fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command.envs(self.envs.iter().map(|(k, v)| (k, v)));
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }
        command
    }
}

/// How the orchestrator reaches the scenario runner
#[derive(Clone)]
pub enum RunnerHandle {
    /// Called directly; serial or thread backend
    InProcess(Arc<dyn ScenarioRunner>),
    /// Called by a spawned worker; process backend
    Subprocess(WorkerCommand),
}

impl RunnerHandle {
    /// Wrap an in-process runner
    #[must_use]
    pub fn in_process(runner: impl ScenarioRunner) -> Self {
        Self::InProcess(Arc::new(runner))
    }

    /// Short description for errors and logs
    #[must_use]
    pub const fn describe(&self) -> &'static str {
        match self {
            Self::InProcess(_) => "in-process",
            Self::Subprocess(_) => "subprocess",
        }
    }
}

impl fmt::Debug for RunnerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProcess(_) => f.write_str("InProcess(..)"),
            Self::Subprocess(cmd) => f.debug_tuple("Subprocess").field(cmd).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closures_are_runners() {
        let runner = |ctx: &RunContext, _: &RunnerConfig, s: &Scenario, _: Option<&[CompletedEvent]>| {
            assert_eq!(ctx.scenario_id(), s.scenario_id);
            Ok::<_, RunError>(RunResult::success())
        };
        let scenario = Scenario::new("s1", gauntlet_graph::ScenarioGraph::new());
        let ctx = RunContext::new("s1", 1);
        let result = ScenarioRunner::run(&runner, &ctx, &RunnerConfig::default(), &scenario, None).unwrap();
        assert!(result.is_success());
    }

    #[test]
    fn current_exe_sets_worker_env() {
        let cmd = WorkerCommand::current_exe().unwrap();
        assert!(cmd.envs.contains(&(OsString::from(WORKER_ENV), OsString::from("1"))));
    }

    #[test]
    fn handle_description() {
        assert_eq!(RunnerHandle::Subprocess(WorkerCommand::new("sh")).describe(), "subprocess");
        let handle = RunnerHandle::in_process(|_: &RunContext, _: &RunnerConfig, _: &Scenario, _: Option<&[CompletedEvent]>| {
            Ok::<_, RunError>(RunResult::unvalidated())
        });
        assert_eq!(handle.describe(), "in-process");
    }
}
