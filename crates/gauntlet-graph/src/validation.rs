//! Mutation rules
//!
//! Each check runs against a candidate graph that already contains the
//! mutation. Nothing here mutates.

use crate::error::{GraphError, Result};
use crate::event::{Event, EventId, EventType};
use crate::graph::ScenarioGraph;
use crate::timing::TIME_EPSILON;

/// Dependency cardinality for the given events
///
/// - AGENT: at least one dependency
/// - ENV: exactly one, and not a plain agent action
/// - USER, CONDITION: unconstrained
pub(crate) fn check_cardinality(graph: &ScenarioGraph, ids: &[EventId]) -> Result<()> {
    for id in ids {
        let Some(event) = graph.event(id) else {
            continue;
        };
        match event.event_type() {
            EventType::Agent if event.dependencies.is_empty() => {
                return Err(GraphError::MissingDependency(id.clone()));
            }
            EventType::Env => {
                let [dep] = event.dependencies.as_slice() else {
                    return Err(GraphError::EnvDependencyCount {
                        event: id.clone(),
                        found: event.dependencies.len(),
                    });
                };
                let plain_agent = graph.event(dep).is_some_and(|parent| {
                    parent.event_type() == EventType::Agent && !parent.is_send_message_to_user()
                });
                if plain_agent {
                    return Err(GraphError::InvalidEnvDependency {
                        event: id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(())
}

/// All message events must form one chain
///
/// Walking message events in dependency order, each must be an ancestor of
/// the next. A message on a parallel branch has no defined turn order.
pub(crate) fn check_single_branch(graph: &ScenarioGraph, mutated: &EventId) -> Result<()> {
    let order = graph.topological_order()?;
    let messages: Vec<&EventId> = order
        .iter()
        .filter(|id| graph.event(id).is_some_and(Event::is_message))
        .collect();

    for pair in messages.windows(2) {
        let (first, second) = (pair[0], pair[1]);
        if !graph.ancestors(second).contains(first) {
            return Err(GraphError::SingleBranchViolation {
                event: mutated.clone(),
                first: first.clone(),
                second: second.clone(),
            });
        }
    }
    Ok(())
}

/// A send-message-to-user event must be the latest event of its turn
///
/// Expects the candidate's turn index to be fresh.
pub(crate) fn check_time_ordering(graph: &ScenarioGraph) -> Result<()> {
    let times = graph.accumulate_times(None)?;

    for message in graph.events().filter(|e| e.is_send_message_to_user()) {
        let (Some(turn), Some(&message_time)) = (graph.turn_of(&message.id), times.get(&message.id))
        else {
            continue;
        };
        for other in graph.events_in_turn(turn) {
            if other.id == message.id {
                continue;
            }
            let Some(&event_time) = times.get(&other.id) else {
                continue;
            };
            if event_time > message_time + TIME_EPSILON {
                return Err(GraphError::MessageNotLastInTurn {
                    turn,
                    message: message.id.clone(),
                    event: other.id.clone(),
                    event_time,
                    message_time,
                });
            }
        }
    }
    Ok(())
}
