//! Scenario graph invariants under construction, editing, and loading

use gauntlet_graph::{Action, EventDraft, EventId, GraphError, ScenarioGraph};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// Fixtures
// ============================================================================

/// userMsg -> agentReply (+1s) -> envUpdate (+1s), as imported from a trace
fn example_graph() -> ScenarioGraph {
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

fn reply(id: &str) -> EventDraft {
    EventDraft::agent(Action::send_message_to_user("done")).with_id(id)
}

fn task(id: &str) -> EventDraft {
    EventDraft::user(Action::send_message_to_agent("next task")).with_id(id)
}

fn id(s: &str) -> EventId {
    EventId::from(s)
}

// ============================================================================
// Example scenario
// ============================================================================

#[test]
fn example_graph_is_a_single_turn() {
    let graph = example_graph();
    let turns = graph.compute_turn_index();
    assert_eq!(turns[&id("userMsg")], 0);
    assert_eq!(turns[&id("agentReply")], 0);
    assert_eq!(turns[&id("envUpdate")], 0);

    let times = graph.accumulate_times(None).unwrap();
    assert!((times[&id("envUpdate")] - 2.0).abs() < 1e-9);
}

#[test]
fn second_reply_on_disjoint_branch_is_rejected() {
    let mut graph = example_graph();
    graph
        .add_event(reply("reply1").depends_on(["envUpdate"]))
        .unwrap();

    let side = graph
        .add_event(EventDraft::condition().with_id("side"))
        .unwrap();
    let before = graph.len();

    let err = graph
        .add_event(reply("reply2").depends_on([&side]))
        .unwrap_err();
    assert!(
        matches!(err, GraphError::SingleBranchViolation { .. }),
        "unexpected error: {err}"
    );
    assert_eq!(graph.len(), before);
    assert!(!graph.contains(&id("reply2")));
}

#[test]
fn multi_turn_conversation() {
    let mut graph = example_graph();
    let r1 = graph.add_event(reply("r1").depends_on(["envUpdate"])).unwrap();
    let t2 = graph.add_event(task("t2").depends_on([&r1]).after(5.0)).unwrap();
    let a2 = graph
        .add_event(
            EventDraft::agent(Action::new("Calendar", "delete_event"))
                .with_id("a2")
                .depends_on([&t2])
                .after(1.0),
        )
        .unwrap();
    let r2 = graph.add_event(reply("r2").depends_on([&a2])).unwrap();

    assert_eq!(graph.turn_of(&r1), Some(0));
    assert_eq!(graph.turn_of(&t2), Some(1));
    assert_eq!(graph.turn_of(&r2), Some(1));
    assert_eq!(graph.turn_count(), 2);
    assert!((graph.duration().unwrap() - 8.0).abs() < 1e-9);
    graph.check_edge_symmetry().unwrap();
}

// ============================================================================
// Single-branch rule under edit sequences
// ============================================================================

/// task -> work -> reply -> followUp
fn conversation() -> ScenarioGraph {
    let mut graph = ScenarioGraph::new();
    graph.add_event(task("task")).unwrap();
    graph
        .add_event(
            EventDraft::agent(Action::new("Mail", "search"))
                .with_id("work")
                .depends_on(["task"])
                .after(1.0),
        )
        .unwrap();
    graph.add_event(reply("reply").depends_on(["work"])).unwrap();
    graph
        .add_event(task("followUp").depends_on(["reply"]).after(1.0))
        .unwrap();
    graph.add_event(EventDraft::condition().with_id("side")).unwrap();
    graph
}

#[test]
fn edit_that_detaches_middle_of_chain_is_rejected() {
    let mut graph = conversation();
    let err = graph
        .edit_event(
            &id("work"),
            EventDraft::agent(Action::new("Mail", "search")).depends_on(["side"]),
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::SingleBranchViolation { .. }));
    assert_eq!(graph.event(&id("work")).unwrap().dependencies(), &[id("task")]);
}

#[test]
fn edit_that_moves_reply_off_branch_is_rejected() {
    let mut graph = conversation();
    let err = graph
        .edit_event(&id("reply"), reply("reply").depends_on(["side"]))
        .unwrap_err();
    assert!(matches!(err, GraphError::SingleBranchViolation { .. }));
}

#[test]
fn edit_that_keeps_chain_is_accepted() {
    let mut graph = conversation();
    graph
        .edit_event(
            &id("work"),
            EventDraft::agent(Action::new("Mail", "archive"))
                .depends_on(["task", "side"])
                .after(2.0),
        )
        .unwrap();
    assert_eq!(graph.turn_of(&id("followUp")), Some(1));
    graph.check_edge_symmetry().unwrap();
}

#[test]
fn edit_turning_action_into_message_on_parallel_branch_is_rejected() {
    let mut graph = conversation();
    graph
        .add_event(
            EventDraft::user(Action::new("Phone", "ring"))
                .with_id("ring")
                .depends_on(["side"]),
        )
        .unwrap();
    let err = graph
        .edit_event(
            &id("ring"),
            EventDraft::user(Action::send_message_to_agent("hello?")).depends_on(["side"]),
        )
        .unwrap_err();
    assert!(matches!(err, GraphError::SingleBranchViolation { .. }));
}

#[test]
fn delete_then_add_detects_broken_chain() {
    let mut graph = conversation();
    // deletion never validates, followUp is now a second root message
    graph.delete_event(&id("reply")).unwrap();
    assert!(graph.event(&id("followUp")).unwrap().dependencies().is_empty());

    let err = graph
        .add_event(reply("again").depends_on(["work"]))
        .unwrap_err();
    assert!(matches!(err, GraphError::SingleBranchViolation { .. }));
}

// ============================================================================
// Property tests
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Add { kind: u8, deps: Vec<usize>, delay: u8 },
    Edit { target: usize, kind: u8, deps: Vec<usize>, delay: u8 },
    Delete { target: usize },
    Patch,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..5, prop::collection::vec(0usize..32, 0..3), 0u8..4)
            .prop_map(|(kind, deps, delay)| Op::Add { kind, deps, delay }),
        2 => (0usize..32, 0u8..5, prop::collection::vec(0usize..32, 0..3), 0u8..4)
            .prop_map(|(target, kind, deps, delay)| Op::Edit { target, kind, deps, delay }),
        1 => (0usize..32).prop_map(|target| Op::Delete { target }),
        1 => Just(Op::Patch),
    ]
}

fn draft_for(kind: u8, deps: Vec<EventId>, delay: u8) -> EventDraft {
    let draft = match kind {
        0 => EventDraft::agent(Action::new("Tool", "call")),
        1 => EventDraft::agent(Action::send_message_to_user("reply")),
        2 => EventDraft::env(Action::new("World", "tick")),
        3 => EventDraft::user(Action::send_message_to_agent("ask")),
        _ => EventDraft::condition(),
    };
    draft.depends_on(deps).after(f64::from(delay))
}

fn pick(ids: &[EventId], indices: &[usize]) -> Vec<EventId> {
    if ids.is_empty() {
        return Vec::new();
    }
    indices.iter().map(|i| ids[i % ids.len()].clone()).collect()
}

/// A random DAG in snapshot form: node i may depend on any earlier node
fn dag_strategy() -> impl Strategy<Value = Vec<(bool, Vec<usize>, u8)>> {
    prop::collection::vec((any::<bool>(), prop::collection::vec(any::<usize>(), 0..3), 0u8..5), 1..20)
        .prop_map(|nodes| {
            nodes
                .into_iter()
                .enumerate()
                .map(|(i, (is_reply, deps, delay))| {
                    let deps = if i == 0 {
                        Vec::new()
                    } else {
                        let mut d: Vec<usize> = deps.into_iter().map(|x| x % i).collect();
                        d.sort_unstable();
                        d.dedup();
                        d
                    };
                    (is_reply, deps, delay)
                })
                .collect()
        })
}

fn snapshot_event(i: usize, is_reply: bool, deps: &[usize], delay: u8) -> Value {
    let kind = if is_reply {
        json!({"type": "AGENT", "action": {"app": "AgentUserInterface", "function": "send_message_to_user"}})
    } else {
        json!({"type": "CONDITION"})
    };
    json!({
        "id": format!("n{i}"),
        "kind": kind,
        "timing": {"relative": f64::from(delay)},
        "dependencies": deps.iter().map(|d| format!("n{d}")).collect::<Vec<_>>(),
    })
}

fn load(events: Vec<Value>) -> ScenarioGraph {
    serde_json::from_value(json!({ "events": events })).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn edges_stay_symmetric_under_any_mutation_sequence(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let mut graph = ScenarioGraph::new();
        for op in ops {
            let ids: Vec<EventId> = graph.events().map(|e| e.id().clone()).collect();
            let _ = match op {
                Op::Add { kind, deps, delay } => {
                    graph.add_event(draft_for(kind, pick(&ids, &deps), delay)).map(|_| ())
                }
                Op::Edit { target, kind, deps, delay } if !ids.is_empty() => {
                    let target = ids[target % ids.len()].clone();
                    graph.edit_event(&target, draft_for(kind, pick(&ids, &deps), delay)).map(|_| ())
                }
                Op::Delete { target } if !ids.is_empty() => {
                    graph.delete_event(&ids[target % ids.len()]).map(|_| ())
                }
                Op::Patch => graph.patch_oracle_ordering().map(|_| ()),
                _ => Ok(()),
            };

            prop_assert!(graph.check_edge_symmetry().is_ok());
            prop_assert!(graph.topological_order().is_ok());
            prop_assert_eq!(graph.turn_indices(), &graph.compute_turn_index());
        }
    }

    #[test]
    fn turn_index_ignores_insertion_order(
        (nodes, order) in dag_strategy().prop_flat_map(|nodes| {
            let n = nodes.len();
            (Just(nodes), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
        })
    ) {
        let in_order: Vec<Value> = nodes
            .iter()
            .enumerate()
            .map(|(i, (r, d, t))| snapshot_event(i, *r, d, *t))
            .collect();
        let shuffled: Vec<Value> = order.iter().map(|&i| in_order[i].clone()).collect();

        let a = load(in_order).compute_turn_index();
        let b = load(shuffled).compute_turn_index();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn accumulated_time_never_precedes_dependencies(nodes in dag_strategy()) {
        let graph = load(
            nodes
                .iter()
                .enumerate()
                .map(|(i, (r, d, t))| snapshot_event(i, *r, d, *t))
                .collect(),
        );
        let times = graph.accumulate_times(None).unwrap();
        for event in graph.events() {
            for dep in event.dependencies() {
                prop_assert!(times[event.id()] >= times[dep]);
            }
        }
    }

    #[test]
    fn absolute_time_before_dependency_fails_instead_of_clamping(
        base in 1.0f64..100.0,
        gap in 0.01f64..50.0,
    ) {
        let graph = load(vec![
            json!({"id": "a", "kind": {"type": "CONDITION"}, "timing": {"absolute": base}}),
            json!({"id": "b", "kind": {"type": "CONDITION"}, "timing": {"absolute": base - gap}, "dependencies": ["a"]}),
        ]);
        match graph.accumulate_times(None) {
            Err(GraphError::TimeOrdering(e)) => {
                prop_assert_eq!(e.event, id("b"));
                prop_assert!((e.floor - base).abs() < 1e-9);
            }
            other => prop_assert!(false, "expected time ordering failure, got {:?}", other),
        }
    }
}
