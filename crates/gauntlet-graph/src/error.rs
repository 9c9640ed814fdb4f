//! Error types for event graph construction and timing

use crate::event::{EventId, EventType};
use thiserror::Error;

/// Result alias for graph operations
pub type Result<T> = std::result::Result<T, GraphError>;

/// An explicit absolute time that falls before its dependencies
#[derive(Debug, Clone, PartialEq, Error)]
#[error("event {event} is scheduled at {time}s, before its earliest permitted time {floor}s")]
pub struct TimeOrderingError {
    /// Offending event
    pub event: EventId,
    /// The explicit absolute time requested
    pub time: f64,
    /// Max of dependency times and scenario start
    pub floor: f64,
}

/// Errors raised while building or querying a [`ScenarioGraph`](crate::ScenarioGraph)
///
/// Every mutation that returns one of these leaves the graph untouched.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    /// Id already present in the graph
    #[error("duplicate event id: {0}")]
    DuplicateEventId(EventId),

    /// Referenced event does not exist
    #[error("unknown event: {0}")]
    UnknownEvent(EventId),

    /// A dependency points at a missing event
    #[error("event {event} depends on unknown event {dependency}")]
    UnknownDependency {
        /// Event being added or edited
        event: EventId,
        /// Missing dependency id
        dependency: EventId,
    },

    /// Both absolute and relative time were supplied
    #[error("event {0} has both an absolute and a relative time")]
    ConflictingTiming(EventId),

    /// Time values must be finite and non-negative
    #[error("event {event} has invalid time {value}")]
    InvalidTime {
        /// Offending event
        event: EventId,
        /// Rejected value
        value: f64,
    },

    /// Time comparators only apply to agent events
    #[error("event {event} of type {event_type} cannot carry a time comparator")]
    ComparatorNotAllowed {
        /// Offending event
        event: EventId,
        /// Its type
        event_type: EventType,
    },

    /// Agent events need at least one dependency
    #[error("agent event {0} must depend on at least one event")]
    MissingDependency(EventId),

    /// Environment events need exactly one dependency
    #[error("environment event {event} must have exactly one dependency, found {found}")]
    EnvDependencyCount {
        /// Offending event
        event: EventId,
        /// Number of dependencies supplied
        found: usize,
    },

    /// Environment events cannot hang off a plain agent action
    #[error("environment event {event} cannot depend on agent event {dependency}")]
    InvalidEnvDependency {
        /// Offending event
        event: EventId,
        /// The agent event it depends on
        dependency: EventId,
    },

    /// Two message events sit on disjoint branches
    #[error("event {event} breaks the single message branch: {first} and {second} are not ordered")]
    SingleBranchViolation {
        /// Event whose mutation was rejected
        event: EventId,
        /// Earlier message event
        first: EventId,
        /// Message event not reachable from `first`
        second: EventId,
    },

    /// An event runs past the turn-closing message
    #[error(
        "event {event} at {event_time}s runs after {message} at {message_time}s, which closes turn {turn}"
    )]
    MessageNotLastInTurn {
        /// Turn index
        turn: usize,
        /// The send-message-to-user event closing the turn
        message: EventId,
        /// Offending event
        event: EventId,
        /// Offending event time
        event_time: f64,
        /// Message event time
        message_time: f64,
    },

    /// Dependency would close a cycle
    #[error("event {event} cannot depend on {dependency}: the edge would create a cycle")]
    Cycle {
        /// Event being mutated
        event: EventId,
        /// Dependency that closes the loop
        dependency: EventId,
    },

    /// Dependency and successor lists disagree
    #[error("asymmetric edge between {from} and {to}")]
    AsymmetricEdge {
        /// Dependency side
        from: EventId,
        /// Successor side
        to: EventId,
    },

    /// Placeholder names an event that does not exist
    #[error("event {event} references unknown event {reference} in a placeholder")]
    UnresolvedPlaceholder {
        /// Referencing event
        event: EventId,
        /// Unknown id
        reference: EventId,
    },

    /// Placeholder names an event that is not upstream
    #[error("event {event} references {reference}, which is not one of its ancestors")]
    PlaceholderNotUpstream {
        /// Referencing event
        event: EventId,
        /// Referenced event
        reference: EventId,
    },

    /// Explicit time earlier than dependencies
    #[error(transparent)]
    TimeOrdering(#[from] TimeOrderingError),
}

impl GraphError {
    /// Check if this is a structural/validation rejection rather than a timing failure
    #[inline]
    #[must_use]
    pub fn is_validation(&self) -> bool {
        !matches!(self, Self::TimeOrdering(_))
    }

    /// Event the error is attributed to, when there is one
    #[must_use]
    pub fn event(&self) -> Option<&EventId> {
        match self {
            Self::DuplicateEventId(id)
            | Self::UnknownEvent(id)
            | Self::ConflictingTiming(id)
            | Self::MissingDependency(id) => Some(id),
            Self::UnknownDependency { event, .. }
            | Self::InvalidTime { event, .. }
            | Self::ComparatorNotAllowed { event, .. }
            | Self::EnvDependencyCount { event, .. }
            | Self::InvalidEnvDependency { event, .. }
            | Self::SingleBranchViolation { event, .. }
            | Self::MessageNotLastInTurn { event, .. }
            | Self::Cycle { event, .. }
            | Self::UnresolvedPlaceholder { event, .. }
            | Self::PlaceholderNotUpstream { event, .. } => Some(event),
            Self::AsymmetricEdge { from, .. } => Some(from),
            Self::TimeOrdering(err) => Some(&err.event),
        }
    }
}
