//! Testing utilities for the Gauntlet workspace
//!
//! Shared scenario fixtures, scripted runners, and worker scripts.

#![allow(missing_docs)]

use gauntlet_graph::{Action, EventDraft, ScenarioGraph};
use gauntlet_runner::{
    CompletedEvent, IterSource, RunContext, RunError, RunResult, RunnerConfig, Scenario,
    ScenarioItem, ScenarioRunner, SourceError, WorkerCommand,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Reply line a worker prints for a passing run
pub const SUCCESS_REPLY: &str = r#"{"ok":{"verdict":"success"}}"#;

/// userMsg -> agentReply (+1s) -> envUpdate (+1s), as imported from a trace
pub fn example_graph() -> ScenarioGraph {
    let snapshot = json!({
        "start_time": 0.0,
        "events": [
            {
                "id": "userMsg",
                "kind": {"type": "USER", "action": {
                    "app": "AgentUserInterface",
                    "function": "send_message_to_agent",
                    "args": {"content": "What's on my calendar?"}
                }}
            },
            {
                "id": "agentReply",
                "kind": {"type": "AGENT", "action": {"app": "Calendar", "function": "list_events"}},
                "timing": {"relative": 1.0},
                "dependencies": ["userMsg"]
            },
            {
                "id": "envUpdate",
                "kind": {"type": "ENV", "action": {"app": "Calendar", "function": "add_event"}},
                "timing": {"relative": 1.0},
                "dependencies": ["agentReply"]
            }
        ]
    });
    serde_json::from_value(snapshot).unwrap()
}

/// A user/agent exchange repeated `turns` times, one second apart
pub fn conversation_graph(turns: usize) -> ScenarioGraph {
    let mut graph = ScenarioGraph::new();
    let mut last = None;
    for turn in 0..turns {
        let mut ask = EventDraft::user(Action::send_message_to_agent(format!("task {turn}")))
            .with_id(format!("task{turn}"));
        if let Some(prev) = last.take() {
            ask = ask.depends_on([prev]).after(1.0);
        }
        let ask = graph.add_event(ask).unwrap();
        let reply = EventDraft::agent(Action::send_message_to_user(format!("done {turn}")))
            .with_id(format!("reply{turn}"))
            .depends_on([ask])
            .after(1.0);
        last = Some(graph.add_event(reply).unwrap());
    }
    graph
}

pub fn scenario(id: &str) -> Scenario {
    Scenario::new(id, example_graph())
}

pub fn scenarios(ids: &[&str]) -> Vec<Scenario> {
    ids.iter().map(|id| scenario(id)).collect()
}

pub fn source(ids: &[&str]) -> IterSource<std::vec::IntoIter<Result<ScenarioItem, SourceError>>> {
    IterSource::from_scenarios(scenarios(ids))
}

/// Tracks how many runs are executing at once
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn enter(&self) -> GaugeGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(Arc::clone(&self.current))
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard(Arc<AtomicUsize>);

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Runner whose outcome is scripted per scenario id
///
/// Unscripted scenarios pass after `delay`. Clones share their counters.
#[derive(Debug, Clone, Default)]
pub struct ScriptedRunner {
    delay: Duration,
    slow: HashMap<String, Duration>,
    failing: HashSet<String>,
    unvalidated: HashSet<String>,
    calls: Arc<AtomicUsize>,
    gauge: Gauge,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn slow(mut self, id: &str, sleep: Duration) -> Self {
        self.slow.insert(id.to_string(), sleep);
        self
    }

    pub fn failing(mut self, id: &str) -> Self {
        self.failing.insert(id.to_string());
        self
    }

    pub fn unvalidated(mut self, id: &str) -> Self {
        self.unvalidated.insert(id.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.gauge.peak()
    }
}

impl ScenarioRunner for ScriptedRunner {
    fn run(
        &self,
        ctx: &RunContext,
        _config: &RunnerConfig,
        scenario: &Scenario,
        _events: Option<&[CompletedEvent]>,
    ) -> Result<RunResult, RunError> {
        let _running = self.gauge.enter();
        self.calls.fetch_add(1, Ordering::SeqCst);

        let id = scenario.scenario_id.as_str();
        std::thread::sleep(self.slow.get(id).copied().unwrap_or(self.delay));

        if self.failing.contains(id) {
            return Err(RunError::new("ValueError", format!("{id} run {} failed", ctx.run_number())));
        }
        if self.unvalidated.contains(id) {
            return Ok(RunResult::unvalidated());
        }
        Ok(RunResult::success().with_rationale(format!("{id} passed")))
    }
}

/// `sh -c script`
pub fn sh_worker(script: &str) -> WorkerCommand {
    WorkerCommand::new("sh").args(["-c", script])
}

/// Worker that passes every run, sleeping `secs` first for scenario `slow_id`
pub fn sleepy_worker(slow_id: &str, secs: u64) -> WorkerCommand {
    sh_worker(&format!(
        r#"read req; case "$req" in *'"scenario_id":"{slow_id}"'*) sleep {secs};; esac; echo '{SUCCESS_REPLY}'"#
    ))
}
