//! Turn segmentation
//!
//! A turn is the stretch of the timeline between two send-message-to-user
//! events. Turn numbers are assigned breadth-first from root events; an event
//! is only visited once all of its dependencies have been, so the result does
//! not depend on the order events were inserted.

use crate::event::{Event, EventId};
use crate::graph::ScenarioGraph;
use std::collections::{HashMap, VecDeque};

pub(crate) fn compute(graph: &ScenarioGraph) -> HashMap<EventId, usize> {
    let events = graph.raw_events();

    let mut pending: HashMap<&EventId, usize> = events
        .values()
        .map(|e| {
            let known = e
                .dependencies
                .iter()
                .filter(|d| events.contains_key(*d))
                .count();
            (&e.id, known)
        })
        .collect();

    let mut queue: VecDeque<&EventId> = events
        .values()
        .filter(|e| pending.get(&e.id) == Some(&0))
        .map(|e| &e.id)
        .collect();

    let mut turns = HashMap::with_capacity(events.len());
    while let Some(id) = queue.pop_front() {
        let Some(event) = events.get(id) else {
            continue;
        };

        let mut turn = 0;
        let mut crosses_boundary = false;
        for dep in &event.dependencies {
            if let Some(t) = turns.get(dep) {
                turn = turn.max(*t);
            }
            if events.get(dep).is_some_and(Event::is_send_message_to_user) {
                crosses_boundary = true;
            }
        }
        turns.insert(id.clone(), turn + usize::from(crosses_boundary));

        for succ in &event.successors {
            if let Some(count) = pending.get_mut(succ) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    queue.push_back(succ);
                }
            }
        }
    }
    turns
}
