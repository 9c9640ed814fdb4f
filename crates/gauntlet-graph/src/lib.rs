//! Gauntlet Event Graph
//!
//! A scenario is a DAG of timed events. This crate owns that graph and every
//! rule a valid scenario must satisfy.
//!
//! # Core Concepts
//!
//! - [`ScenarioGraph`]: the event DAG; the only place edges are wired
//! - [`Event`] / [`EventKind`]: one scheduled unit of behavior (agent, env, user, condition)
//! - [`EventDraft`]: builder describing an event to add or substitute
//! - Turns: timeline segments closed by agent replies to the user
//! - [`Hint`]: guidance kept in lockstep with task and environment events
//! - [`PlaceholderReference`]: an argument that stands for another event's output
//!
//! # Example
//!
//! ```rust,ignore
//! use gauntlet_graph::prelude::*;
//!
//! let mut graph = ScenarioGraph::new();
//! let task = graph.add_event(EventDraft::user(Action::send_message_to_agent("hi")))?;
//! let reply = graph.add_event(
//!     EventDraft::agent(Action::send_message_to_user("hello")).depends_on([&task]).after(1.0),
//! )?;
//! assert_eq!(graph.turn_of(&reply), Some(0));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod error;
mod event;
mod graph;
mod hints;
mod placeholder;
mod timing;
mod turns;
mod validation;

pub use error::{GraphError, Result, TimeOrderingError};
pub use event::{
    Action, Event, EventDraft, EventId, EventKind, EventTiming, EventType, TimeComparator,
    AGENT_UI_APP, SEND_MESSAGE_TO_AGENT, SEND_MESSAGE_TO_USER,
};
pub use graph::ScenarioGraph;
pub use hints::{Hint, HintKind};
pub use placeholder::{PlaceholderConflict, PlaceholderReference, PlaceholderResolution};

/// Common imports
pub mod prelude {
    pub use crate::{
        Action, Event, EventDraft, EventId, EventKind, EventType, GraphError, ScenarioGraph,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
