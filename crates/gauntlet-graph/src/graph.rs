//! The scenario graph
//!
//! [`ScenarioGraph`] owns every event of a scenario and is the only place
//! where edges are wired. Each mutator works on a candidate copy, runs the
//! validation rules against it, and swaps it in only when all of them pass.
//!
//! Invariants maintained by every mutator:
//! - dependency and successor lists are mutually symmetric
//! - the graph is acyclic
//! - ids are unique
//! - the turn index and hint table reflect the current events

use crate::error::{GraphError, Result};
use crate::event::{Event, EventDraft, EventId, EventType};
use crate::hints::{Hint, HintKind};
use crate::{timing, turns, validation};
use indexmap::IndexMap;
use petgraph::graphmap::DiGraphMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// A DAG of timed scenario events
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "GraphSnapshot", into = "GraphSnapshot")]
pub struct ScenarioGraph {
    start_time: f64,
    events: IndexMap<EventId, Event>,
    turns: HashMap<EventId, usize>,
    hints: IndexMap<EventId, Hint>,
}

impl ScenarioGraph {
    /// Create an empty graph starting at time zero
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty graph with a scenario start floor
    #[must_use]
    pub fn with_start_time(start_time: f64) -> Self {
        Self {
            start_time,
            ..Self::default()
        }
    }

    /// Scenario start floor in seconds
    #[inline]
    #[must_use]
    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// Move the start floor; relative timings follow it
    #[inline]
    pub fn set_start_time(&mut self, start_time: f64) {
        self.start_time = start_time;
    }

    /// Number of events
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the graph has no events
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Check if an event exists
    #[inline]
    #[must_use]
    pub fn contains(&self, id: &EventId) -> bool {
        self.events.contains_key(id)
    }

    /// Look up an event
    #[inline]
    #[must_use]
    pub fn event(&self, id: &EventId) -> Option<&Event> {
        self.events.get(id)
    }

    /// Events in insertion order
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    /// Message events (to user or to agent) in insertion order
    pub fn message_events(&self) -> impl Iterator<Item = &Event> {
        self.events.values().filter(|e| e.is_message())
    }

    /// Turn of an event, from the maintained index
    #[inline]
    #[must_use]
    pub fn turn_of(&self, id: &EventId) -> Option<usize> {
        self.turns.get(id).copied()
    }

    /// The maintained turn index
    #[inline]
    #[must_use]
    pub fn turn_indices(&self) -> &HashMap<EventId, usize> {
        &self.turns
    }

    /// Number of turns spanned by the graph
    #[must_use]
    pub fn turn_count(&self) -> usize {
        self.turns.values().max().map_or(0, |max| max + 1)
    }

    /// Events of one turn, in insertion order
    #[must_use]
    pub fn events_in_turn(&self, turn: usize) -> Vec<&Event> {
        self.events
            .values()
            .filter(|e| self.turns.get(&e.id) == Some(&turn))
            .collect()
    }

    /// Hints in insertion order
    pub fn hints(&self) -> impl Iterator<Item = &Hint> {
        self.hints.values()
    }

    /// Hint attached to an event
    #[inline]
    #[must_use]
    pub fn hint(&self, id: &EventId) -> Option<&Hint> {
        self.hints.get(id)
    }

    /// Replace the content of an existing hint
    ///
    /// # Errors
    /// Returns [`GraphError::UnknownEvent`] if the event carries no hint
    pub fn set_hint_content(&mut self, id: &EventId, content: impl Into<String>) -> Result<()> {
        let hint = self
            .hints
            .get_mut(id)
            .ok_or_else(|| GraphError::UnknownEvent(id.clone()))?;
        hint.content = content.into();
        Ok(())
    }

    /// Add an event after validating it against the whole graph
    ///
    /// Checks, in order: structure (id, dependencies, timing), dependency
    /// cardinality, the single message branch, and per-turn time ordering.
    ///
    /// # Errors
    /// Returns the first rule the new event breaks; the graph is unchanged.
    pub fn add_event(&mut self, mut draft: EventDraft) -> Result<EventId> {
        let id = draft.take_id();
        let event = draft.build(id.clone())?;

        if self.events.contains_key(&id) {
            return Err(GraphError::DuplicateEventId(id));
        }
        self.check_dependencies_exist(&event)?;
        let is_message = event.is_message();

        let mut candidate = self.clone();
        candidate.insert_wired(event);
        validation::check_cardinality(&candidate, std::slice::from_ref(&id))?;
        if is_message {
            validation::check_single_branch(&candidate, &id)?;
        }
        candidate.refresh_turns();
        validation::check_time_ordering(&candidate)?;
        candidate.sync_hint(None, &id);

        *self = candidate;
        debug!(event = %id, turn = ?self.turn_of(&id), "event added");
        Ok(id)
    }

    /// Replace an event, rewiring its successors onto the replacement
    ///
    /// The id is preserved when the event type is unchanged; otherwise the
    /// draft's id (or a fresh one) is used and successors are pointed at it.
    ///
    /// # Errors
    /// Same rules as [`add_event`](Self::add_event), plus cycle detection and
    /// re-validation of successors; the graph is unchanged on error.
    pub fn edit_event(&mut self, id: &EventId, mut draft: EventDraft) -> Result<EventId> {
        let old = self
            .events
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::UnknownEvent(id.clone()))?;

        let new_id = if draft.event_type() == old.event_type() {
            id.clone()
        } else {
            draft.take_id()
        };
        let event = draft.build(new_id.clone())?;

        if new_id != *id && self.events.contains_key(&new_id) {
            return Err(GraphError::DuplicateEventId(new_id));
        }
        self.check_dependencies_exist(&event)?;
        let downstream = self.descendants(id);
        if let Some(dep) = event
            .dependencies
            .iter()
            .find(|dep| *dep == id || downstream.contains(*dep))
        {
            return Err(GraphError::Cycle {
                event: new_id,
                dependency: dep.clone(),
            });
        }

        let mut candidate = self.clone();
        candidate.replace_wired(&old, event);
        let mut touched = vec![new_id.clone()];
        touched.extend(old.successors.iter().cloned());
        validation::check_cardinality(&candidate, &touched)?;
        validation::check_single_branch(&candidate, &new_id)?;
        candidate.refresh_turns();
        validation::check_time_ordering(&candidate)?;
        candidate.sync_hint(Some(&old), &new_id);

        *self = candidate;
        debug!(event = %id, replacement = %new_id, "event edited");
        Ok(new_id)
    }

    /// Remove an event and detach it from its neighbors
    ///
    /// Does not cascade: successors simply lose the dependency.
    ///
    /// # Errors
    /// Returns [`GraphError::UnknownEvent`] if the id is absent
    pub fn delete_event(&mut self, id: &EventId) -> Result<Event> {
        let mut removed = self
            .events
            .shift_remove(id)
            .ok_or_else(|| GraphError::UnknownEvent(id.clone()))?;

        for dep in &removed.dependencies {
            if let Some(parent) = self.events.get_mut(dep) {
                parent.successors.retain(|s| s != id);
            }
        }
        for succ in &removed.successors {
            if let Some(child) = self.events.get_mut(succ) {
                child.dependencies.retain(|d| d != id);
            }
        }
        removed.successors.clear();
        self.hints.shift_remove(id);
        self.refresh_turns();

        debug!(event = %id, "event deleted");
        Ok(removed)
    }

    /// Compute each event's turn
    ///
    /// Roots are turn 0. An event's turn is the max of its dependencies'
    /// turns, plus one if any dependency is a send-message-to-user event.
    #[must_use]
    pub fn compute_turn_index(&self) -> HashMap<EventId, usize> {
        turns::compute(self)
    }

    /// Absolute time of every event on the scenario clock
    ///
    /// `override_time` pins one event to an absolute time for a what-if
    /// computation without touching the graph.
    ///
    /// # Errors
    /// Returns [`GraphError::TimeOrdering`] when an absolute time falls
    /// before its dependencies; times are never clamped.
    pub fn accumulate_times(
        &self,
        override_time: Option<(&EventId, f64)>,
    ) -> Result<HashMap<EventId, f64>> {
        timing::accumulate(self, override_time)
    }

    /// Make each turn's send-message-to-user event depend on every event
    /// sharing that turn's latest time
    ///
    /// Idempotent. Returns the number of edges added.
    ///
    /// # Errors
    /// Propagates timing failures from [`accumulate_times`](Self::accumulate_times)
    pub fn patch_oracle_ordering(&mut self) -> Result<usize> {
        let patches = timing::oracle_patches(self)?;
        for (from, to) in &patches {
            self.link(from, to);
        }
        if !patches.is_empty() {
            self.refresh_turns();
            debug!(edges = patches.len(), "oracle ordering patched");
        }
        Ok(patches.len())
    }

    /// Latest accumulated time minus the start floor
    ///
    /// # Errors
    /// Propagates timing failures
    pub fn duration(&self) -> Result<f64> {
        let times = self.accumulate_times(None)?;
        let latest = times.values().copied().fold(self.start_time, f64::max);
        Ok(latest - self.start_time)
    }

    /// Verify every dependency edge has its successor back-reference and vice versa
    ///
    /// # Errors
    /// Returns the first [`GraphError::AsymmetricEdge`] found
    pub fn check_edge_symmetry(&self) -> Result<()> {
        for event in self.events.values() {
            for dep in &event.dependencies {
                let back = self
                    .events
                    .get(dep)
                    .is_some_and(|parent| parent.successors.contains(&event.id));
                if !back {
                    return Err(GraphError::AsymmetricEdge {
                        from: dep.clone(),
                        to: event.id.clone(),
                    });
                }
            }
            for succ in &event.successors {
                let forward = self
                    .events
                    .get(succ)
                    .is_some_and(|child| child.dependencies.contains(&event.id));
                if !forward {
                    return Err(GraphError::AsymmetricEdge {
                        from: event.id.clone(),
                        to: succ.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Events in an order where every dependency precedes its dependents
    ///
    /// # Errors
    /// Returns [`GraphError::Cycle`] if the edges contain a cycle
    pub fn topological_order(&self) -> Result<Vec<EventId>> {
        let mut g: DiGraphMap<usize, ()> = DiGraphMap::with_capacity(self.len(), self.len());
        for (idx, event) in self.events.values().enumerate() {
            g.add_node(idx);
            for dep in &event.dependencies {
                if let Some(dep_idx) = self.events.get_index_of(dep) {
                    g.add_edge(dep_idx, idx, ());
                }
            }
        }

        let order = petgraph::algo::toposort(&g, None).map_err(|cycle| {
            let id = self.id_at(cycle.node_id());
            GraphError::Cycle {
                event: id.clone(),
                dependency: id,
            }
        })?;
        Ok(order.into_iter().map(|idx| self.id_at(idx)).collect())
    }

    /// Transitive dependencies of an event (excluding itself)
    #[must_use]
    pub fn ancestors(&self, id: &EventId) -> HashSet<EventId> {
        self.walk(id, |e| e.dependencies.as_slice())
    }

    /// Transitive successors of an event (excluding itself)
    #[must_use]
    pub fn descendants(&self, id: &EventId) -> HashSet<EventId> {
        self.walk(id, |e| e.successors.as_slice())
    }

    fn walk<'a>(
        &'a self,
        id: &EventId,
        next: impl Fn(&'a Event) -> &'a [EventId],
    ) -> HashSet<EventId> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&EventId> = self
            .events
            .get(id)
            .map(|e| next(e).iter().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if seen.insert(current.clone()) {
                if let Some(event) = self.events.get(current) {
                    stack.extend(next(event));
                }
            }
        }
        seen
    }

    fn id_at(&self, idx: usize) -> EventId {
        self.events
            .get_index(idx)
            .map(|(id, _)| id.clone())
            .unwrap_or_else(|| EventId::from(format!("#{idx}")))
    }

    fn check_dependencies_exist(&self, event: &Event) -> Result<()> {
        match event.dependencies.iter().find(|dep| !self.events.contains_key(*dep)) {
            Some(missing) => Err(GraphError::UnknownDependency {
                event: event.id.clone(),
                dependency: missing.clone(),
            }),
            None => Ok(()),
        }
    }

    fn insert_wired(&mut self, event: Event) {
        for dep in &event.dependencies {
            if let Some(parent) = self.events.get_mut(dep) {
                parent.successors.push(event.id.clone());
            }
        }
        self.events.insert(event.id.clone(), event);
    }

    fn replace_wired(&mut self, old: &Event, mut event: Event) {
        for dep in &old.dependencies {
            if let Some(parent) = self.events.get_mut(dep) {
                parent.successors.retain(|s| *s != old.id);
            }
        }
        for succ in &old.successors {
            if let Some(child) = self.events.get_mut(succ) {
                for dep in &mut child.dependencies {
                    if *dep == old.id {
                        dep.clone_from(&event.id);
                    }
                }
            }
        }
        for dep in &event.dependencies {
            if let Some(parent) = self.events.get_mut(dep) {
                parent.successors.push(event.id.clone());
            }
        }
        event.successors.clone_from(&old.successors);

        let position = self.events.get_index_of(&old.id).unwrap_or(self.events.len());
        self.events.shift_remove(&old.id);
        let position = position.min(self.events.len());
        self.events.shift_insert(position, event.id.clone(), event);
    }

    /// Add the edge `from -> to` on both sides
    pub(crate) fn link(&mut self, from: &EventId, to: &EventId) {
        if let Some(child) = self.events.get_mut(to) {
            if child.dependencies.contains(from) {
                return;
            }
            child.dependencies.push(from.clone());
        }
        if let Some(parent) = self.events.get_mut(from) {
            parent.successors.push(to.clone());
        }
    }

    pub(crate) fn refresh_turns(&mut self) {
        self.turns = turns::compute(self);
    }

    fn sync_hint(&mut self, old: Option<&Event>, new_id: &EventId) {
        let previous = old.and_then(|o| self.hints.shift_remove(&o.id));
        let Some(event) = self.events.get(new_id) else {
            return;
        };
        let Some(kind) = HintKind::for_event(event) else {
            return;
        };
        let hint = match previous {
            Some(mut kept) if kept.kind == kind => {
                kept.event_id = new_id.clone();
                kept
            }
            _ => Hint::for_event(kind, event),
        };
        self.hints.insert(new_id.clone(), hint);
    }

    pub(crate) fn raw_events(&self) -> &IndexMap<EventId, Event> {
        &self.events
    }
}

/// Serialized form: events with dependencies only; successors are rebuilt on load
#[derive(Debug, Clone, Serialize, Deserialize)]
struct GraphSnapshot {
    #[serde(default)]
    start_time: f64,
    events: Vec<Event>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    hints: Vec<Hint>,
}

impl From<ScenarioGraph> for GraphSnapshot {
    fn from(graph: ScenarioGraph) -> Self {
        Self {
            start_time: graph.start_time,
            events: graph.events.into_values().collect(),
            hints: graph.hints.into_values().collect(),
        }
    }
}

impl TryFrom<GraphSnapshot> for ScenarioGraph {
    type Error = GraphError;

    fn try_from(snapshot: GraphSnapshot) -> Result<Self> {
        let mut graph = Self::with_start_time(snapshot.start_time);
        for mut event in snapshot.events {
            if graph.events.contains_key(&event.id) {
                return Err(GraphError::DuplicateEventId(event.id));
            }
            event.successors.clear();
            graph.events.insert(event.id.clone(), event);
        }

        let edges: Vec<(EventId, EventId)> = graph
            .events
            .values()
            .flat_map(|e| e.dependencies.iter().map(|d| (d.clone(), e.id.clone())))
            .collect();
        for (from, to) in edges {
            match graph.events.get_mut(&from) {
                Some(parent) => parent.successors.push(to),
                None => {
                    return Err(GraphError::UnknownDependency {
                        event: to,
                        dependency: from,
                    })
                }
            }
        }
        graph.topological_order()?;

        for hint in snapshot.hints {
            if graph.events.contains_key(&hint.event_id) {
                graph.hints.insert(hint.event_id.clone(), hint);
            }
        }
        graph.refresh_turns();
        Ok(graph)
    }
}

impl ScenarioGraph {
    /// Ids of every event of a given type
    #[must_use]
    pub fn ids_of_type(&self, event_type: EventType) -> Vec<EventId> {
        self.events
            .values()
            .filter(|e| e.event_type() == event_type)
            .map(|e| e.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Action;

    fn task(id: &str) -> EventDraft {
        EventDraft::user(Action::send_message_to_agent("plan a trip")).with_id(id)
    }

    fn tool(id: &str) -> EventDraft {
        EventDraft::agent(Action::new("Calendar", "create_event")).with_id(id)
    }

    #[test]
    fn test_add_wires_both_sides() {
        let mut graph = ScenarioGraph::new();
        let t = graph.add_event(task("t")).unwrap();
        let a = graph.add_event(tool("a").depends_on([&t]).after(1.0)).unwrap();

        assert_eq!(graph.event(&t).unwrap().successors(), &[a.clone()]);
        assert_eq!(graph.event(&a).unwrap().dependencies(), &[t]);
        graph.check_edge_symmetry().unwrap();
    }

    #[test]
    fn test_generated_id_when_none_given() {
        let mut graph = ScenarioGraph::new();
        let id = graph.add_event(EventDraft::condition()).unwrap();
        assert!(id.as_str().starts_with("condition-"));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut graph = ScenarioGraph::new();
        graph.add_event(task("t")).unwrap();
        let err = graph.add_event(EventDraft::condition().with_id("t")).unwrap_err();
        assert_eq!(err, GraphError::DuplicateEventId(EventId::from("t")));
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut graph = ScenarioGraph::new();
        let err = graph
            .add_event(tool("a").depends_on(["ghost"]))
            .unwrap_err();
        assert!(matches!(err, GraphError::UnknownDependency { .. }));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_delete_does_not_cascade() {
        let mut graph = ScenarioGraph::new();
        let t = graph.add_event(task("t")).unwrap();
        let a = graph.add_event(tool("a").depends_on([&t])).unwrap();
        let b = graph.add_event(tool("b").depends_on([&a])).unwrap();

        graph.delete_event(&a).unwrap();

        assert!(graph.contains(&b));
        assert!(graph.event(&b).unwrap().dependencies().is_empty());
        assert!(graph.event(&t).unwrap().successors().is_empty());
        graph.check_edge_symmetry().unwrap();
    }

    #[test]
    fn test_delete_unknown() {
        let mut graph = ScenarioGraph::new();
        assert!(matches!(
            graph.delete_event(&EventId::from("x")),
            Err(GraphError::UnknownEvent(_))
        ));
    }

    #[test]
    fn test_edit_same_type_keeps_id_and_successors() {
        let mut graph = ScenarioGraph::new();
        let t = graph.add_event(task("t")).unwrap();
        let a = graph.add_event(tool("a").depends_on([&t]).after(1.0)).unwrap();
        let b = graph.add_event(tool("b").depends_on([&a]).after(1.0)).unwrap();

        let edited = graph
            .edit_event(&a, EventDraft::agent(Action::new("Mail", "send")).depends_on([&t]).after(3.0))
            .unwrap();

        assert_eq!(edited, a);
        assert_eq!(graph.event(&a).unwrap().successors(), &[b.clone()]);
        let times = graph.accumulate_times(None).unwrap();
        assert!((times[&b] - 4.0).abs() < 1e-9);
        graph.check_edge_symmetry().unwrap();
    }

    #[test]
    fn test_edit_type_change_renames_and_rewires() {
        let mut graph = ScenarioGraph::new();
        let t = graph.add_event(task("t")).unwrap();
        let c = graph.add_event(EventDraft::condition().with_id("c").depends_on([&t])).unwrap();
        let a = graph.add_event(tool("a").depends_on([&c])).unwrap();

        let replacement = graph
            .edit_event(&c, EventDraft::user(Action::new("Notes", "write")).with_id("u").depends_on([&t]))
            .unwrap();

        assert_eq!(replacement, EventId::from("u"));
        assert!(!graph.contains(&c));
        assert_eq!(graph.event(&a).unwrap().dependencies(), &[replacement.clone()]);
        assert_eq!(graph.event(&replacement).unwrap().successors(), &[a]);
        graph.check_edge_symmetry().unwrap();
    }

    #[test]
    fn test_edit_rejects_cycle() {
        let mut graph = ScenarioGraph::new();
        let t = graph.add_event(task("t")).unwrap();
        let a = graph.add_event(tool("a").depends_on([&t])).unwrap();
        let b = graph.add_event(tool("b").depends_on([&a])).unwrap();

        let err = graph.edit_event(&a, tool("a").depends_on([&b])).unwrap_err();
        assert!(matches!(err, GraphError::Cycle { .. }));
        assert_eq!(graph.event(&a).unwrap().dependencies(), &[t]);
    }

    #[test]
    fn test_edit_revalidates_successors() {
        let mut graph = ScenarioGraph::new();
        let t = graph.add_event(task("t")).unwrap();
        let c = graph.add_event(EventDraft::condition().with_id("c").depends_on([&t])).unwrap();
        graph
            .add_event(EventDraft::env(Action::new("Weather", "rain")).with_id("e").depends_on([&c]))
            .unwrap();

        // Turning the condition into a plain agent action orphans the env event's rule
        let err = graph
            .edit_event(&c, tool("a2").depends_on([&t]))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidEnvDependency { .. }));
        assert!(graph.contains(&c));
    }

    #[test]
    fn test_turn_count_and_events_in_turn() {
        let mut graph = ScenarioGraph::new();
        let t = graph.add_event(task("t")).unwrap();
        let reply = graph
            .add_event(EventDraft::agent(Action::send_message_to_user("ok")).with_id("r").depends_on([&t]).after(1.0))
            .unwrap();
        let next = graph.add_event(tool("n").depends_on([&reply])).unwrap();

        assert_eq!(graph.turn_count(), 2);
        let turn1: Vec<_> = graph.events_in_turn(1).iter().map(|e| e.id().clone()).collect();
        assert_eq!(turn1, vec![next]);
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let mut graph = ScenarioGraph::new();
        let t = graph.add_event(task("t")).unwrap();
        let a = graph.add_event(tool("a").depends_on([&t])).unwrap();
        let b = graph.add_event(tool("b").depends_on([&t, &a])).unwrap();

        let order = graph.topological_order().unwrap();
        let pos = |id: &EventId| order.iter().position(|x| x == id).unwrap();
        assert!(pos(&t) < pos(&a));
        assert!(pos(&a) < pos(&b));
    }

    #[test]
    fn test_snapshot_round_trip_rebuilds_successors() {
        let mut graph = ScenarioGraph::with_start_time(10.0);
        let t = graph.add_event(task("t")).unwrap();
        let a = graph.add_event(tool("a").depends_on([&t]).after(2.0)).unwrap();
        graph.set_hint_content(&t, "Book the flights first").unwrap();

        let json = serde_json::to_string(&graph).unwrap();
        let restored: ScenarioGraph = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.start_time(), 10.0);
        assert_eq!(restored.event(&t).unwrap().successors(), &[a]);
        assert_eq!(restored.hint(&t).unwrap().content, "Book the flights first");
        restored.check_edge_symmetry().unwrap();
    }

    #[test]
    fn test_snapshot_with_cycle_rejected() {
        let json = r#"{
            "events": [
                {"id": "a", "kind": {"type": "CONDITION"}, "dependencies": ["b"]},
                {"id": "b", "kind": {"type": "CONDITION"}, "dependencies": ["a"]}
            ]
        }"#;
        let err = serde_json::from_str::<ScenarioGraph>(json).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_duration() {
        let mut graph = ScenarioGraph::with_start_time(5.0);
        let t = graph.add_event(task("t").after(1.0)).unwrap();
        graph.add_event(tool("a").depends_on([&t]).after(2.5)).unwrap();
        assert!((graph.duration().unwrap() - 3.5).abs() < 1e-9);
    }
}
