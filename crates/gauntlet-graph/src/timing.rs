//! Timing reconciliation
//!
//! Events carry either an absolute time or a delay relative to their latest
//! dependency. Accumulation resolves both into one scenario clock.

use crate::error::{Result, TimeOrderingError};
use crate::event::{EventId, EventTiming};
use crate::graph::ScenarioGraph;
use std::collections::HashMap;

/// Tolerance for comparing accumulated times
pub(crate) const TIME_EPSILON: f64 = 1e-9;

pub(crate) fn accumulate(
    graph: &ScenarioGraph,
    override_time: Option<(&EventId, f64)>,
) -> Result<HashMap<EventId, f64>> {
    let order = graph.topological_order()?;
    let mut times: HashMap<EventId, f64> = HashMap::with_capacity(order.len());

    for id in order {
        let Some(event) = graph.event(&id) else {
            continue;
        };
        let floor = event
            .dependencies
            .iter()
            .filter_map(|d| times.get(d).copied())
            .fold(graph.start_time(), f64::max);

        let timing = match override_time {
            Some((target, t)) if *target == id => EventTiming::Absolute(t),
            _ => event.timing,
        };
        let time = match timing {
            EventTiming::Relative(delay) => floor + delay,
            EventTiming::Absolute(t) if t + TIME_EPSILON < floor => {
                return Err(TimeOrderingError {
                    event: id,
                    time: t,
                    floor,
                }
                .into());
            }
            EventTiming::Absolute(t) => t,
        };
        times.insert(id, time);
    }
    Ok(times)
}

/// Edges `(peer -> message)` needed so each turn's reply follows every
/// event tied at the turn's latest time
pub(crate) fn oracle_patches(graph: &ScenarioGraph) -> Result<Vec<(EventId, EventId)>> {
    let times = accumulate(graph, None)?;
    let mut patches = Vec::new();

    for message in graph.events().filter(|e| e.is_send_message_to_user()) {
        let Some(turn) = graph.turn_of(message.id()) else {
            continue;
        };
        let in_turn = graph.events_in_turn(turn);
        let latest = in_turn
            .iter()
            .filter_map(|e| times.get(e.id()).copied())
            .fold(f64::NEG_INFINITY, f64::max);
        let downstream = graph.descendants(message.id());

        for peer in in_turn {
            if peer.id() == message.id()
                || message.dependencies().contains(peer.id())
                || downstream.contains(peer.id())
            {
                continue;
            }
            let tied = times
                .get(peer.id())
                .is_some_and(|t| (t - latest).abs() <= TIME_EPSILON);
            if tied {
                patches.push((peer.id().clone(), message.id().clone()));
            }
        }
    }
    Ok(patches)
}

#[cfg(test)]
mod tests {
    use crate::error::GraphError;
    use crate::event::{Action, EventDraft, EventId};
    use crate::graph::ScenarioGraph;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn relative_times_chain() {
        let mut graph = ScenarioGraph::with_start_time(100.0);
        let t = graph
            .add_event(EventDraft::user(Action::send_message_to_agent("go")).after(1.0))
            .unwrap();
        let a = graph
            .add_event(EventDraft::agent(Action::new("Mail", "send")).depends_on([&t]).after(2.0))
            .unwrap();
        let times = graph.accumulate_times(None).unwrap();
        assert!(approx(times[&t], 101.0));
        assert!(approx(times[&a], 103.0));
    }

    #[test]
    fn relative_uses_latest_dependency() {
        let mut graph = ScenarioGraph::new();
        let early = graph.add_event(EventDraft::condition().at(1.0)).unwrap();
        let late = graph.add_event(EventDraft::condition().at(7.0)).unwrap();
        let join = graph
            .add_event(EventDraft::condition().depends_on([&early, &late]).after(0.5))
            .unwrap();
        let times = graph.accumulate_times(None).unwrap();
        assert!(approx(times[&join], 7.5));
    }

    #[test]
    fn absolute_time_at_floor_is_accepted() {
        let mut graph = ScenarioGraph::new();
        let a = graph.add_event(EventDraft::condition().at(4.0)).unwrap();
        let b = graph
            .add_event(EventDraft::condition().depends_on([&a]).at(4.0))
            .unwrap();
        assert!(approx(graph.accumulate_times(None).unwrap()[&b], 4.0));
    }

    #[test]
    fn override_is_a_what_if() {
        let mut graph = ScenarioGraph::new();
        let a = graph.add_event(EventDraft::condition().with_id("a").at(2.0)).unwrap();
        let b = graph
            .add_event(EventDraft::condition().depends_on([&a]).after(1.0))
            .unwrap();

        let shifted = graph.accumulate_times(Some((&a, 10.0))).unwrap();
        assert!(approx(shifted[&b], 11.0));

        let err = graph
            .accumulate_times(Some((&b, 0.5)))
            .unwrap_err();
        match err {
            GraphError::TimeOrdering(e) => {
                assert_eq!(e.event, b);
                assert!(approx(e.floor, 2.0));
            }
            other => panic!("unexpected error: {other}"),
        }

        // graph itself unchanged
        assert!(approx(graph.accumulate_times(None).unwrap()[&b], 3.0));
    }

    #[test]
    fn absolute_before_start_fails() {
        let mut graph = ScenarioGraph::with_start_time(5.0);
        let err = graph
            .add_event(EventDraft::condition().with_id("early").at(1.0))
            .unwrap_err();
        assert_eq!(err.event(), Some(&EventId::from("early")));
    }

    #[test]
    fn oracle_patch_links_ties_and_is_idempotent() {
        let mut graph = ScenarioGraph::new();
        let t = graph
            .add_event(EventDraft::user(Action::send_message_to_agent("go")).with_id("t"))
            .unwrap();
        let lookup = graph
            .add_event(
                EventDraft::agent(Action::new("Search", "lookup"))
                    .with_id("lookup")
                    .depends_on([&t])
                    .after(2.0),
            )
            .unwrap();
        let noise = graph
            .add_event(EventDraft::condition().with_id("noise").depends_on([&t]).after(2.0))
            .unwrap();
        let reply = graph
            .add_event(
                EventDraft::agent(Action::send_message_to_user("found it"))
                    .with_id("reply")
                    .depends_on([&lookup]),
            )
            .unwrap();

        assert_eq!(graph.patch_oracle_ordering().unwrap(), 1);
        assert_eq!(
            graph.event(&reply).unwrap().dependencies(),
            &[lookup, noise.clone()]
        );
        assert!(graph.event(&noise).unwrap().successors().contains(&reply));
        graph.check_edge_symmetry().unwrap();

        assert_eq!(graph.patch_oracle_ordering().unwrap(), 0);
    }
}
