//! Batch execution of scenario runs
//!
//! [`ScenarioOrchestrator::run_all`] pulls scenarios lazily, expands each one
//! into `runs_per_scenario` private copies, answers what it can from the
//! cache, and pushes the rest through the pipeline. Every outcome, including
//! timeouts and crashes, lands in the [`AggregateResult`] as data.
//!
//! Cache hits and load errors never reach the pipeline; the job stream hands
//! them back over a channel that is drained between completions.

use crate::config::RunnerConfig;
use crate::error::{OrchestratorError, SourceError};
use crate::manifest::write_manifest;
use crate::result::{AggregateResult, RunKey, RunRecord, RunResult};
use crate::runner::{RunContext, RunnerHandle, ScenarioRunner};
use crate::scenario::{ScenarioItem, ScenarioSource};
use crate::worker::{run_timed, to_work_error, RunJob, SubprocessWorker};
use gauntlet_cache::{CacheKey, CachedResult, Fingerprint, ResultCache};
use gauntlet_pipeline::{
    Backend, BackendKind, Completion, Completions, Pipeline, ProcessBackend, SerialBackend, StopFlag,
    ThreadBackend, WorkError, Worker,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared flag that stops a batch at its next poll cycle
pub type StopHandle = StopFlag;

/// Outcome decided without running anything
enum Settled {
    LoadError(SourceError),
    Cached(RunKey, RunRecord),
}

/// Runs scenario batches
#[derive(Debug)]
pub struct ScenarioOrchestrator {
    config: Arc<RunnerConfig>,
    runner: RunnerHandle,
    cache: Option<ResultCache>,
    config_fingerprint: Fingerprint,
}

impl ScenarioOrchestrator {
    /// Validate `config` against `runner` and build an orchestrator
    ///
    /// # Errors
    /// Returns [`OrchestratorError::Config`] for invalid settings and
    /// [`OrchestratorError::BackendMismatch`] when the backend cannot drive
    /// this kind of runner
    pub fn new(config: RunnerConfig, runner: RunnerHandle) -> Result<Self, OrchestratorError> {
        config.ensure_valid()?;
        check_backend(config.executor_backend, &runner)?;
        let config_fingerprint = config.fingerprint()?;
        let cache = config.result_cache();
        if let Some(cache) = &cache {
            debug!(root = %cache.root().display(), "result caching enabled");
        }
        Ok(Self {
            config: Arc::new(config),
            runner,
            cache,
            config_fingerprint,
        })
    }

    /// Replace the cache chosen from the configuration
    #[must_use]
    pub fn with_cache(mut self, cache: Option<ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Batch settings
    #[inline]
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Result cache in use
    #[inline]
    #[must_use]
    pub fn cache(&self) -> Option<&ResultCache> {
        self.cache.as_ref()
    }

    /// Run every scenario of `source`
    ///
    /// # Errors
    /// - [`OrchestratorError::Interrupted`] if `stop` was triggered; carries the finished runs
    /// - [`OrchestratorError::NoScenarios`] if not a single run was processed
    ///
    /// A manifest that cannot be written does not fail the batch; see
    /// [`AggregateResult::manifest_error`]
    pub fn run_all<S>(&self, source: &mut S, stop: &StopHandle) -> Result<AggregateResult, OrchestratorError>
    where
        S: ScenarioSource + ?Sized,
    {
        let pipeline = Pipeline::new(self.config.pipeline_config())?;
        info!(
            backend = %self.config.executor_backend,
            max_in_flight = self.config.max_concurrent_scenarios,
            timeout_secs = ?self.config.per_scenario_timeout_secs,
            runs_per_scenario = self.config.runs_per_scenario,
            scenarios = ?source.len_hint(),
            caching = self.cache.is_some(),
            "starting scenario batch"
        );

        let (settled_tx, settled_rx) = mpsc::channel();
        let jobs = JobStream {
            source,
            orchestrator: self,
            pending: VecDeque::new(),
            settled: settled_tx,
        };
        let mut aggregate = AggregateResult::new();

        match (&self.runner, self.config.executor_backend) {
            (RunnerHandle::InProcess(runner), BackendKind::Serial) => {
                let backend = SerialBackend::new(self.in_process_worker(runner));
                self.drive(pipeline.run_until(jobs, backend, stop.clone()), &mut aggregate, &settled_rx);
            }
            (RunnerHandle::InProcess(runner), BackendKind::Thread) => {
                let backend = ThreadBackend::new(self.in_process_worker(runner));
                self.drive(pipeline.run_until(jobs, backend, stop.clone()), &mut aggregate, &settled_rx);
            }
            (RunnerHandle::Subprocess(command), BackendKind::Process) => {
                let worker = SubprocessWorker::new(self.config.as_ref().clone(), command.clone());
                let backend = ProcessBackend::new(worker).with_grace(self.config.termination_grace());
                self.drive(pipeline.run_until(jobs, backend, stop.clone()), &mut aggregate, &settled_rx);
            }
            (runner, backend) => {
                return Err(OrchestratorError::BackendMismatch {
                    backend,
                    runner: runner.describe(),
                })
            }
        }
        absorb_settled(&settled_rx, &mut aggregate);

        self.conclude(aggregate, stop)
    }

    /// [`run_all`](Self::run_all) on a blocking thread, stopping when `interrupt` resolves
    ///
    /// # Errors
    /// As [`run_all`](Self::run_all), plus [`OrchestratorError::Task`] if the
    /// batch thread panicked
    pub async fn run_with_interrupt<S, F>(
        self: Arc<Self>,
        source: S,
        interrupt: F,
    ) -> Result<AggregateResult, OrchestratorError>
    where
        S: ScenarioSource + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let stop = StopHandle::new();
        let watcher = {
            let stop = stop.clone();
            tokio::spawn(async move {
                interrupt.await;
                warn!("interrupt received, stopping scenario batch");
                stop.trigger();
            })
        };

        let batch = tokio::task::spawn_blocking(move || {
            let mut source = source;
            self.run_all(&mut source, &stop)
        })
        .await;
        watcher.abort();

        batch.map_err(|e| OrchestratorError::Task(e.to_string()))?
    }

    /// [`run_with_interrupt`](Self::run_with_interrupt) on Ctrl-C
    ///
    /// # Errors
    /// As [`run_with_interrupt`](Self::run_with_interrupt)
    pub async fn run_until_interrupted<S>(self: Arc<Self>, source: S) -> Result<AggregateResult, OrchestratorError>
    where
        S: ScenarioSource + Send + 'static,
    {
        self.run_with_interrupt(source, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "cannot listen for Ctrl-C; batch will not be interruptible");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    fn in_process_worker(&self, runner: &Arc<dyn ScenarioRunner>) -> InProcessWorker {
        InProcessWorker {
            runner: Arc::clone(runner),
            config: Arc::clone(&self.config),
        }
    }

    /// Private copies of one scenario, one per run
    fn expand(&self, item: ScenarioItem) -> Vec<RunJob> {
        let ScenarioItem { mut scenario, events } = item;
        let config = &self.config;

        if let Some(max_turns) = config.max_turns {
            let turns = scenario.graph.turn_count();
            if turns > max_turns {
                warn!(scenario_id = %scenario.scenario_id, turns, max_turns, "scenario has more turns than allowed");
            }
        }
        if let (Some(cap), Some(duration)) = (config.max_scenario_duration_secs, scenario.duration) {
            if duration > cap {
                warn!(scenario_id = %scenario.scenario_id, duration, cap, "scenario duration exceeds the configured cap");
            }
        }
        if scenario.config_tag.is_none() {
            scenario.config_tag = Some(config.config_tag());
        }

        let scenario_fingerprint = self.cache.as_ref().and_then(|_| match scenario.fingerprint() {
            Ok(fp) => Some(fp),
            Err(e) => {
                warn!(scenario_id = %scenario.scenario_id, error = %e, "scenario cannot be fingerprinted; caching skipped");
                None
            }
        });

        let run_numbers: Vec<u32> = if config.runs_per_scenario == 1 {
            vec![scenario.run_number.unwrap_or(1)]
        } else {
            (1..=config.runs_per_scenario).collect()
        };

        run_numbers
            .into_iter()
            .map(|run_number| {
                let mut copy = scenario.clone();
                copy.run_number = Some(run_number);
                RunJob {
                    cache_key: scenario_fingerprint
                        .map(|_| CacheKey::new(&scenario.scenario_id, run_number, self.config_fingerprint)),
                    scenario: copy,
                    events: events.clone(),
                    run_number,
                    scenario_fingerprint,
                }
            })
            .collect()
    }

    fn cached(&self, job: &RunJob) -> Option<RunRecord> {
        let (cache, key, fingerprint) = (self.cache.as_ref()?, job.cache_key.as_ref()?, job.scenario_fingerprint?);
        let hit = cache.lookup(key, &fingerprint)?;
        Some(RunRecord {
            result: RunResult::from_cached(&hit),
            config_tag: job.scenario.config_tag.clone(),
            cached: true,
        })
    }

    fn store(&self, job: &RunJob, result: &RunResult) {
        let (Some(cache), Some(key), Some(fingerprint)) = (&self.cache, &job.cache_key, job.scenario_fingerprint) else {
            return;
        };
        let mut record = CachedResult::new(key.clone(), fingerprint)
            .with_success(result.verdict.as_option())
            .with_export_path(result.export_path.clone())
            .with_rationale(result.rationale.clone());
        record.duration_secs = result.duration_secs;
        if let Some(exception) = &result.exception {
            record = record.with_exception(exception.kind.clone(), exception.message.clone());
        }
        cache.store(&record);
    }

    fn drive<I, B>(
        &self,
        completions: Completions<RunJob, RunResult, I, B>,
        aggregate: &mut AggregateResult,
        settled: &Receiver<Settled>,
    ) where
        I: Iterator<Item = RunJob>,
        B: Backend<RunJob, RunResult>,
    {
        for Completion { item: job, result, elapsed } in completions {
            absorb_settled(settled, aggregate);

            let (result, cacheable) = match result {
                Ok(mut result) => {
                    if result.duration_secs <= 0.0 {
                        result.duration_secs = elapsed.as_secs_f64();
                    }
                    (result, true)
                }
                Err(e) => {
                    if e.is_timeout() {
                        warn!(scenario_id = %job.scenario.scenario_id, run_number = job.run_number, "scenario run timed out");
                    } else {
                        warn!(scenario_id = %job.scenario.scenario_id, run_number = job.run_number, error = %e, "scenario run failed");
                    }
                    let cacheable = matches!(e, WorkError::Failed { .. } | WorkError::Panicked(_));
                    (RunResult::from_work_error(&e, elapsed), cacheable)
                }
            };

            if cacheable {
                self.store(&job, &result);
            }

            let key = RunKey::new(job.scenario.scenario_id, job.run_number);
            info!(
                scenario_id = %key.scenario_id,
                run_number = key.run_number,
                verdict = ?result.verdict,
                duration_secs = result.duration_secs,
                "scenario run finished"
            );
            aggregate.record(
                key,
                RunRecord {
                    result,
                    config_tag: job.scenario.config_tag,
                    cached: false,
                },
            );
            info!(
                completed = aggregate.len(),
                success_rate = format_args!("{:.1}%", aggregate.success_rate() * 100.0),
                "batch progress"
            );
        }
    }

    fn conclude(&self, mut aggregate: AggregateResult, stop: &StopHandle) -> Result<AggregateResult, OrchestratorError> {
        if stop.is_triggered() {
            self.write_manifest(&mut aggregate);
            warn!(completed = aggregate.len(), "scenario batch interrupted");
            return Err(OrchestratorError::Interrupted {
                partial: Box::new(aggregate),
            });
        }

        if aggregate.is_empty() {
            error!(load_errors = aggregate.load_errors(), "no scenarios were processed");
            return Err(OrchestratorError::NoScenarios);
        }

        self.write_manifest(&mut aggregate);
        info!(
            runs = aggregate.len(),
            succeeded = aggregate.success_count(),
            failed = aggregate.failed_count(),
            exceptions = aggregate.exception_count(),
            unvalidated = aggregate.unvalidated_count(),
            cached = aggregate.cached_count(),
            load_errors = aggregate.load_errors(),
            success_rate = format_args!("{:.1}%", aggregate.success_rate() * 100.0),
            "scenario batch finished"
        );
        Ok(aggregate)
    }

    /// Write the manifest; a failure is logged and noted on the aggregate
    fn write_manifest(&self, aggregate: &mut AggregateResult) {
        let dir = self.config.batch_output_dir();
        let outcome = match write_manifest(&dir, aggregate) {
            Ok(path) => {
                info!(path = %path.display(), runs = aggregate.len(), "manifest written");
                Ok(path)
            }
            Err((path, e)) => {
                error!(path = %path.display(), error = %e, "failed to write manifest; results are still returned");
                Err(format!("{}: {e}", path.display()))
            }
        };
        aggregate.set_manifest(outcome);
    }
}

fn check_backend(backend: BackendKind, runner: &RunnerHandle) -> Result<(), OrchestratorError> {
    match (backend, runner) {
        (BackendKind::Serial | BackendKind::Thread, RunnerHandle::InProcess(_))
        | (BackendKind::Process, RunnerHandle::Subprocess(_)) => Ok(()),
        (backend, runner) => Err(OrchestratorError::BackendMismatch {
            backend,
            runner: runner.describe(),
        }),
    }
}

fn absorb_settled(settled: &Receiver<Settled>, aggregate: &mut AggregateResult) {
    for outcome in settled.try_iter() {
        match outcome {
            Settled::LoadError(e) => {
                warn!(scenario_id = ?e.scenario_id, error = %e, "skipping scenario that failed to load");
                aggregate.record_load_error();
            }
            Settled::Cached(key, record) => {
                info!(scenario_id = %key.scenario_id, run_number = key.run_number, verdict = ?record.result.verdict, "scenario run served from cache");
                aggregate.record(key, record);
            }
        }
    }
}

/// Lazily turns source items into pipeline jobs
struct JobStream<'a, S: ?Sized> {
    source: &'a mut S,
    orchestrator: &'a ScenarioOrchestrator,
    pending: VecDeque<RunJob>,
    settled: Sender<Settled>,
}

impl<S: ScenarioSource + ?Sized> Iterator for JobStream<'_, S> {
    type Item = RunJob;

    fn next(&mut self) -> Option<RunJob> {
        loop {
            if let Some(job) = self.pending.pop_front() {
                if let Some(record) = self.orchestrator.cached(&job) {
                    let key = RunKey::new(job.scenario.scenario_id, job.run_number);
                    // receiver outlives the stream
                    let _ = self.settled.send(Settled::Cached(key, record));
                    continue;
                }
                return Some(job);
            }

            match self.source.next_item()? {
                Ok(item) => {
                    let jobs = self.orchestrator.expand(item);
                    self.pending.extend(jobs);
                }
                Err(e) => {
                    let _ = self.settled.send(Settled::LoadError(e));
                }
            }
        }
    }
}

/// Calls the runner on the pipeline's thread
struct InProcessWorker {
    runner: Arc<dyn ScenarioRunner>,
    config: Arc<RunnerConfig>,
}

impl Worker<RunJob> for InProcessWorker {
    type Output = RunResult;

    fn run(&self, job: &RunJob) -> Result<RunResult, WorkError> {
        let ctx = RunContext::new(&job.scenario.scenario_id, job.run_number);
        let _guard = ctx.span().clone().entered();
        run_timed(self.runner.as_ref(), &ctx, &self.config, &job.scenario, job.events.as_deref())
            .map_err(to_work_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RunError;
    use crate::runner::WorkerCommand;
    use crate::scenario::{CompletedEvent, IterSource, Scenario};
    use gauntlet_graph::ScenarioGraph;

    fn ok_runner() -> RunnerHandle {
        RunnerHandle::in_process(
            |_: &RunContext, _: &RunnerConfig, _: &Scenario, _: Option<&[CompletedEvent]>| {
                Ok::<_, RunError>(RunResult::success())
            },
        )
    }

    fn config(backend: BackendKind) -> RunnerConfig {
        RunnerConfig {
            executor_backend: backend,
            max_concurrent_scenarios: 2,
            ..RunnerConfig::default()
        }
    }

    #[test]
    fn process_backend_needs_a_worker_command() {
        let err = ScenarioOrchestrator::new(config(BackendKind::Process), ok_runner()).unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::BackendMismatch {
                backend: BackendKind::Process,
                runner: "in-process"
            }
        ));
        let err = ScenarioOrchestrator::new(
            config(BackendKind::Thread),
            RunnerHandle::Subprocess(WorkerCommand::new("sh")),
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::BackendMismatch { .. }));
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let bad = RunnerConfig {
            runs_per_scenario: 0,
            ..config(BackendKind::Thread)
        };
        assert!(matches!(
            ScenarioOrchestrator::new(bad, ok_runner()),
            Err(OrchestratorError::Config(_))
        ));
    }

    #[test]
    fn expansion_gives_private_numbered_copies() {
        let orchestrator = ScenarioOrchestrator::new(
            RunnerConfig {
                runs_per_scenario: 3,
                ..config(BackendKind::Thread)
            },
            ok_runner(),
        )
        .unwrap();
        let jobs = orchestrator.expand(ScenarioItem::new(Scenario::new("s", ScenarioGraph::new())));
        let numbers: Vec<_> = jobs.iter().map(|j| j.run_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(jobs.iter().all(|j| j.scenario.run_number == Some(j.run_number)));
        assert!(jobs.iter().all(|j| j.scenario.config_tag.as_deref() == Some("default/default")));
        assert!(jobs.iter().all(|j| j.cache_key.is_none()));
    }

    #[test]
    fn single_run_keeps_pinned_run_number() {
        let orchestrator = ScenarioOrchestrator::new(config(BackendKind::Serial), ok_runner()).unwrap();
        let scenario = Scenario::new("s", ScenarioGraph::new()).with_run_number(7);
        let jobs = orchestrator.expand(ScenarioItem::new(scenario));
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].run_number, 7);
    }

    #[test]
    fn load_errors_are_counted_when_absorbed() {
        let (tx, rx) = mpsc::channel();
        tx.send(Settled::LoadError(SourceError::for_scenario("broken", "bad json"))).unwrap();
        tx.send(Settled::LoadError(SourceError::new("unreadable"))).unwrap();
        let mut aggregate = AggregateResult::new();
        absorb_settled(&rx, &mut aggregate);
        assert_eq!(aggregate.load_errors(), 2);
        assert!(aggregate.is_empty());
    }

    #[test]
    fn load_errors_alone_mean_no_scenarios() {
        let orchestrator = ScenarioOrchestrator::new(config(BackendKind::Thread), ok_runner()).unwrap();
        let mut source = IterSource::new(vec![Err(SourceError::new("broken file"))]);
        let err = orchestrator.run_all(&mut source, &StopHandle::new()).unwrap_err();
        assert!(matches!(err, OrchestratorError::NoScenarios));
    }
}
