//! Scenarios and where they come from

use crate::error::SourceError;
use gauntlet_cache::{Fingerprint, FingerprintError};
use gauntlet_graph::{Action, EventId, EventType, ScenarioGraph};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A scripted environment an agent is evaluated against
///
/// The start time lives on the graph. A top-level `start_time` in serialized
/// input is accepted and moved onto the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "ScenarioRecord")]
pub struct Scenario {
    /// Stable identifier
    pub scenario_id: String,
    /// Fixed run number, if the scenario carries one
    #[serde(default)]
    pub run_number: Option<u32>,
    /// Simulated duration cap, in seconds
    #[serde(default)]
    pub duration: Option<f64>,
    /// The event DAG
    #[serde(default)]
    pub graph: ScenarioGraph,
    /// Free-text label used only to group results
    #[serde(default)]
    pub config_tag: Option<String>,
}

/// Serialized form, with the start time optionally outside the graph
#[derive(Deserialize)]
struct ScenarioRecord {
    scenario_id: String,
    #[serde(default)]
    run_number: Option<u32>,
    #[serde(default)]
    start_time: Option<f64>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    graph: ScenarioGraph,
    #[serde(default)]
    config_tag: Option<String>,
}

impl From<ScenarioRecord> for Scenario {
    fn from(record: ScenarioRecord) -> Self {
        let mut graph = record.graph;
        if let Some(start_time) = record.start_time {
            graph.set_start_time(start_time);
        }
        Self {
            scenario_id: record.scenario_id,
            run_number: record.run_number,
            duration: record.duration,
            graph,
            config_tag: record.config_tag,
        }
    }
}

/// Fields that define a scenario's content
#[derive(Serialize)]
struct ScenarioContent<'a> {
    scenario_id: &'a str,
    start_time: f64,
    duration: Option<f64>,
    graph: &'a ScenarioGraph,
}

impl Scenario {
    /// Scenario with the given id and graph
    #[must_use]
    pub fn new(scenario_id: impl Into<String>, graph: ScenarioGraph) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            run_number: None,
            duration: None,
            graph,
            config_tag: None,
        }
    }

    /// Simulated start time, in seconds
    #[inline]
    #[must_use]
    pub fn start_time(&self) -> f64 {
        self.graph.start_time()
    }

    /// Move the simulated start time
    #[inline]
    #[must_use]
    pub fn with_start_time(mut self, seconds: f64) -> Self {
        self.graph.set_start_time(seconds);
        self
    }

    /// Set the duration cap
    #[inline]
    #[must_use]
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    /// Pin the run number
    #[inline]
    #[must_use]
    pub fn with_run_number(mut self, run_number: u32) -> Self {
        self.run_number = Some(run_number);
        self
    }

    /// Fingerprint of the content; the run number and config tag are excluded
    ///
    /// # Errors
    /// Returns an error if the graph cannot be serialized
    pub fn fingerprint(&self) -> Result<Fingerprint, FingerprintError> {
        Fingerprint::of_json(&ScenarioContent {
            scenario_id: &self.scenario_id,
            start_time: self.start_time(),
            duration: self.duration,
            graph: &self.graph,
        })
    }
}

/// An event that already happened in a recorded run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedEvent {
    /// Event that ran
    pub event_id: EventId,
    /// Its type
    pub event_type: EventType,
    /// Simulated time it ran at
    pub time: f64,
    /// What it did
    #[serde(default)]
    pub action: Option<Action>,
    /// What the action returned
    #[serde(default)]
    pub return_value: Option<Value>,
}

/// One entry of a scenario source
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioItem {
    /// The scenario
    pub scenario: Scenario,
    /// Pre-recorded events to replay, if any
    #[serde(default)]
    pub events: Option<Vec<CompletedEvent>>,
}

impl ScenarioItem {
    /// Item without recorded events
    #[inline]
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self {
            scenario,
            events: None,
        }
    }

    /// Item replaying `events`
    #[inline]
    #[must_use]
    pub fn with_events(scenario: Scenario, events: Vec<CompletedEvent>) -> Self {
        Self {
            scenario,
            events: Some(events),
        }
    }
}

impl From<Scenario> for ScenarioItem {
    fn from(scenario: Scenario) -> Self {
        Self::new(scenario)
    }
}

/// Pull-based supply of scenarios
pub trait ScenarioSource {
    /// Next scenario; `None` when exhausted
    fn next_item(&mut self) -> Option<Result<ScenarioItem, SourceError>>;

    /// Number of items left, when known
    fn len_hint(&self) -> Option<usize> {
        None
    }
}

impl<S: ScenarioSource + ?Sized> ScenarioSource for &mut S {
    fn next_item(&mut self) -> Option<Result<ScenarioItem, SourceError>> {
        (**self).next_item()
    }

    fn len_hint(&self) -> Option<usize> {
        (**self).len_hint()
    }
}

/// Adapts an iterator into a [`ScenarioSource`]
#[derive(Debug, Clone)]
pub struct IterSource<I> {
    inner: I,
}

impl<I> IterSource<I>
where
    I: Iterator<Item = Result<ScenarioItem, SourceError>>,
{
    /// Source over items that may have failed to load
    pub fn new(iter: impl IntoIterator<IntoIter = I>) -> Self {
        Self {
            inner: iter.into_iter(),
        }
    }
}

impl IterSource<std::vec::IntoIter<Result<ScenarioItem, SourceError>>> {
    /// Source over scenarios that all loaded
    pub fn from_scenarios(scenarios: impl IntoIterator<Item = Scenario>) -> Self {
        Self {
            inner: scenarios
                .into_iter()
                .map(|s| Ok(ScenarioItem::new(s)))
                .collect::<Vec<_>>()
                .into_iter(),
        }
    }
}

impl<I> ScenarioSource for IterSource<I>
where
    I: Iterator<Item = Result<ScenarioItem, SourceError>>,
{
    fn next_item(&mut self) -> Option<Result<ScenarioItem, SourceError>> {
        self.inner.next()
    }

    fn len_hint(&self) -> Option<usize> {
        match self.inner.size_hint() {
            (lower, Some(upper)) if lower == upper => Some(lower),
            _ => None,
        }
    }
}
