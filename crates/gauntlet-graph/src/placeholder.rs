//! Placeholder references between events
//!
//! An argument string like `"{{search-1}}"` or `"{{search-1.result}}"` stands
//! for the not-yet-known output of another event. Offline replay maps each
//! live tool call back to its oracle event by `(app, function)` within a turn,
//! so two oracle events sharing that pair in one turn make the mapping
//! ambiguous.

use crate::error::{GraphError, Result};
use crate::event::{EventId, EventType};
use crate::graph::ScenarioGraph;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z0-9_:\-]+)(?:\.[^{}\s]*)?\s*\}\}")
            .expect("placeholder pattern is a valid regex")
    })
}

/// One event argument pointing at another event's output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderReference {
    /// Referencing tool, `App__function`
    pub tool_name: String,
    /// Turn of the referencing event
    pub turn: usize,
    /// Referencing event
    pub event_id: EventId,
    /// Event whose output is referenced
    pub referenced_id: EventId,
    /// Turn of the referenced event
    pub referenced_turn: usize,
}

/// Oracle events that cannot be told apart during replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderConflict {
    /// Turn in which the ambiguity occurs
    pub turn: usize,
    /// Shared app
    pub app: String,
    /// Shared function
    pub function: String,
    /// Agent events sharing `(app, function)` in the turn, sorted
    pub event_ids: Vec<EventId>,
}

/// Outcome of [`ScenarioGraph::resolve_placeholders`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceholderResolution {
    /// Every reference found, in event insertion order
    pub references: Vec<PlaceholderReference>,
    /// Ambiguous oracle mappings
    pub conflicts: Vec<PlaceholderConflict>,
}

impl PlaceholderResolution {
    /// Whether the graph can be replayed deterministically
    #[inline]
    #[must_use]
    pub fn is_deterministic(&self) -> bool {
        self.conflicts.is_empty()
    }
}

fn collect_ids(value: &Value, out: &mut Vec<EventId>) {
    match value {
        Value::String(s) => {
            for caps in placeholder_pattern().captures_iter(s) {
                if let Some(m) = caps.get(1) {
                    out.push(EventId::from(m.as_str()));
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| collect_ids(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_ids(v, out)),
        _ => {}
    }
}

impl ScenarioGraph {
    /// Find placeholder references and flag ambiguous oracle mappings
    ///
    /// # Errors
    /// Returns [`GraphError::UnresolvedPlaceholder`] for references to
    /// missing events and [`GraphError::PlaceholderNotUpstream`] for
    /// references to events that are not ancestors of the referencing one.
    pub fn resolve_placeholders(&self) -> Result<PlaceholderResolution> {
        let mut resolution = PlaceholderResolution::default();
        let mut seen_conflicts: BTreeSet<(usize, String, String)> = BTreeSet::new();

        for event in self.events() {
            let Some(action) = event.action() else {
                continue;
            };
            let mut ids = Vec::new();
            for value in action.args.values() {
                collect_ids(value, &mut ids);
            }
            if ids.is_empty() {
                continue;
            }
            let upstream = self.ancestors(event.id());

            for referenced_id in ids {
                let Some(referenced) = self.event(&referenced_id) else {
                    return Err(GraphError::UnresolvedPlaceholder {
                        event: event.id().clone(),
                        reference: referenced_id,
                    });
                };
                if !upstream.contains(&referenced_id) {
                    return Err(GraphError::PlaceholderNotUpstream {
                        event: event.id().clone(),
                        reference: referenced_id,
                    });
                }

                let referenced_turn = self.turn_of(&referenced_id).unwrap_or_default();
                resolution.references.push(PlaceholderReference {
                    tool_name: action.tool_name(),
                    turn: self.turn_of(event.id()).unwrap_or_default(),
                    event_id: event.id().clone(),
                    referenced_id: referenced_id.clone(),
                    referenced_turn,
                });

                if referenced.event_type() != EventType::Agent {
                    continue;
                }
                let Some(target) = referenced.action() else {
                    continue;
                };
                let key = (referenced_turn, target.app.clone(), target.function.clone());
                if seen_conflicts.contains(&key) {
                    continue;
                }
                let mut twins: Vec<EventId> = self
                    .events_in_turn(referenced_turn)
                    .into_iter()
                    .filter(|e| e.event_type() == EventType::Agent)
                    .filter(|e| {
                        e.action()
                            .is_some_and(|a| a.app == target.app && a.function == target.function)
                    })
                    .map(|e| e.id().clone())
                    .collect();
                if twins.len() > 1 {
                    twins.sort();
                    tracing::warn!(
                        turn = referenced_turn,
                        tool = %target.tool_name(),
                        events = twins.len(),
                        "ambiguous oracle events for placeholder replay"
                    );
                    seen_conflicts.insert(key);
                    resolution.conflicts.push(PlaceholderConflict {
                        turn: referenced_turn,
                        app: target.app.clone(),
                        function: target.function.clone(),
                        event_ids: twins,
                    });
                }
            }
        }
        Ok(resolution)
    }
}
