//! Scenario events
//!
//! An [`Event`] is one scheduled unit of scenario behavior. Every event shares
//! the same envelope (id, timing, dependencies, successors); what differs per
//! type lives in [`EventKind`].
//!
//! Events are never constructed directly by callers. They are described with
//! an [`EventDraft`] and handed to
//! [`ScenarioGraph::add_event`](crate::ScenarioGraph::add_event), which owns
//! edge wiring.

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

/// App exposing the agent/user messaging surface
pub const AGENT_UI_APP: &str = "AgentUserInterface";

/// Function an agent calls to end its turn by answering the user
pub const SEND_MESSAGE_TO_USER: &str = "send_message_to_user";

/// Function a user calls to hand the agent a task
pub const SEND_MESSAGE_TO_AGENT: &str = "send_message_to_agent";

/// Unique event identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Generate a fresh id prefixed with the event type
    #[must_use]
    pub fn generate(event_type: EventType) -> Self {
        Self(format!(
            "{}-{}",
            event_type.as_str().to_ascii_lowercase(),
            uuid::Uuid::new_v4()
        ))
    }

    /// Borrow the id as a string slice
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EventId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for EventId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EventId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Who originates an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Action taken by the agent under test
    Agent,
    /// Environment-side change
    Env,
    /// Simulated user action
    User,
    /// Condition check gating later events
    Condition,
}

impl EventType {
    /// Canonical upper-case name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Agent => "AGENT",
            Self::Env => "ENV",
            Self::User => "USER",
            Self::Condition => "CONDITION",
        }
    }
}

impl Display for EventType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an oracle agent event's time is matched against a live one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeComparator {
    /// Live action must happen before the oracle time
    LessThan,
    /// Live action must happen after the oracle time
    GreaterThan,
    /// Live action must happen at the oracle time (within tolerance)
    Equal,
}

/// Target tool call carried by an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// App (tool namespace)
    pub app: String,
    /// Function within the app
    pub function: String,
    /// Named arguments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, Value>,
}

impl Action {
    /// Create an action with no arguments
    #[must_use]
    pub fn new(app: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            function: function.into(),
            args: BTreeMap::new(),
        }
    }

    /// Add an argument
    #[inline]
    #[must_use]
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    /// Agent reply to the user
    #[must_use]
    pub fn send_message_to_user(content: impl Into<String>) -> Self {
        Self::new(AGENT_UI_APP, SEND_MESSAGE_TO_USER).with_arg("content", content.into())
    }

    /// User task handed to the agent
    #[must_use]
    pub fn send_message_to_agent(content: impl Into<String>) -> Self {
        Self::new(AGENT_UI_APP, SEND_MESSAGE_TO_AGENT).with_arg("content", content.into())
    }

    /// Tool name in `App__function` form
    #[must_use]
    pub fn tool_name(&self) -> String {
        format!("{}__{}", self.app, self.function)
    }

    fn is(&self, function: &str) -> bool {
        self.app == AGENT_UI_APP && self.function == function
    }
}

/// Type-specific part of an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Agent action, optionally with an oracle time comparator
    Agent {
        /// Tool call
        action: Action,
        /// Oracle matching rule
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comparator: Option<TimeComparator>,
    },
    /// Environment action
    Env {
        /// Tool call
        action: Action,
    },
    /// User action
    User {
        /// Tool call
        action: Action,
    },
    /// Condition check, no payload
    Condition,
}

impl EventKind {
    /// The event's type tag
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::Agent { .. } => EventType::Agent,
            Self::Env { .. } => EventType::Env,
            Self::User { .. } => EventType::User,
            Self::Condition => EventType::Condition,
        }
    }

    /// Tool call, absent for conditions
    #[must_use]
    pub const fn action(&self) -> Option<&Action> {
        match self {
            Self::Agent { action, .. } | Self::Env { action } | Self::User { action } => {
                Some(action)
            }
            Self::Condition => None,
        }
    }
}

/// When an event fires
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventTiming {
    /// Fixed time in seconds on the scenario clock
    Absolute(f64),
    /// Seconds after the latest dependency (or scenario start)
    Relative(f64),
}

impl Default for EventTiming {
    fn default() -> Self {
        Self::Relative(0.0)
    }
}

/// A node in the scenario graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub(crate) id: EventId,
    pub(crate) kind: EventKind,
    #[serde(default)]
    pub(crate) timing: EventTiming,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub(crate) dependencies: Vec<EventId>,
    #[serde(skip)]
    pub(crate) successors: Vec<EventId>,
}

impl Event {
    /// Event id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &EventId {
        &self.id
    }

    /// Type-specific payload
    #[inline]
    #[must_use]
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Type tag
    #[inline]
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    /// Tool call, absent for conditions
    #[inline]
    #[must_use]
    pub fn action(&self) -> Option<&Action> {
        self.kind.action()
    }

    /// Scheduling
    #[inline]
    #[must_use]
    pub fn timing(&self) -> EventTiming {
        self.timing
    }

    /// Events this one waits for, in declaration order
    #[inline]
    #[must_use]
    pub fn dependencies(&self) -> &[EventId] {
        &self.dependencies
    }

    /// Events waiting for this one
    #[inline]
    #[must_use]
    pub fn successors(&self) -> &[EventId] {
        &self.successors
    }

    /// Oracle comparator (agent events only)
    #[must_use]
    pub fn comparator(&self) -> Option<TimeComparator> {
        match self.kind {
            EventKind::Agent { comparator, .. } => comparator,
            _ => None,
        }
    }

    /// Agent reply that closes a turn
    #[must_use]
    pub fn is_send_message_to_user(&self) -> bool {
        matches!(&self.kind, EventKind::Agent { action, .. } if action.is(SEND_MESSAGE_TO_USER))
    }

    /// User message that hands the agent a task
    #[must_use]
    pub fn is_send_message_to_agent(&self) -> bool {
        matches!(&self.kind, EventKind::User { action } if action.is(SEND_MESSAGE_TO_AGENT))
    }

    /// Either kind of agent/user message
    #[inline]
    #[must_use]
    pub fn is_message(&self) -> bool {
        self.is_send_message_to_user() || self.is_send_message_to_agent()
    }
}

/// Description of an event to add or substitute
///
/// ```rust,ignore
/// let reply = graph.add_event(
///     EventDraft::agent(Action::send_message_to_user("done"))
///         .depends_on([&task])
///         .after(2.0),
/// )?;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    kind: EventKind,
    id: Option<EventId>,
    absolute: Option<f64>,
    relative: Option<f64>,
    comparator: Option<TimeComparator>,
    dependencies: Vec<EventId>,
}

impl EventDraft {
    /// Draft of an arbitrary kind
    #[must_use]
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            id: None,
            absolute: None,
            relative: None,
            comparator: None,
            dependencies: Vec::new(),
        }
    }

    /// Agent action
    #[must_use]
    pub fn agent(action: Action) -> Self {
        Self::new(EventKind::Agent {
            action,
            comparator: None,
        })
    }

    /// Environment action
    #[must_use]
    pub fn env(action: Action) -> Self {
        Self::new(EventKind::Env { action })
    }

    /// User action
    #[must_use]
    pub fn user(action: Action) -> Self {
        Self::new(EventKind::User { action })
    }

    /// Condition check
    #[must_use]
    pub fn condition() -> Self {
        Self::new(EventKind::Condition)
    }

    /// Use an explicit id instead of a generated one
    #[inline]
    #[must_use]
    pub fn with_id(mut self, id: impl Into<EventId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Fire at an absolute scenario time
    #[inline]
    #[must_use]
    pub fn at(mut self, seconds: f64) -> Self {
        self.absolute = Some(seconds);
        self
    }

    /// Fire a delay after the latest dependency
    #[inline]
    #[must_use]
    pub fn after(mut self, seconds: f64) -> Self {
        self.relative = Some(seconds);
        self
    }

    /// Attach an oracle comparator
    #[inline]
    #[must_use]
    pub fn with_comparator(mut self, comparator: TimeComparator) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Add dependencies
    #[must_use]
    pub fn depends_on<I, E>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = E>,
        E: Into<EventId>,
    {
        self.dependencies.extend(ids.into_iter().map(Into::into));
        self
    }

    /// Type of the drafted event
    #[inline]
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    /// Requested id, if any
    #[inline]
    #[must_use]
    pub fn id(&self) -> Option<&EventId> {
        self.id.as_ref()
    }

    /// Build the event, checking timing and comparator. Edges are left unwired.
    pub(crate) fn build(self, id: EventId) -> Result<Event> {
        let timing = match (self.absolute, self.relative) {
            (Some(_), Some(_)) => return Err(GraphError::ConflictingTiming(id)),
            (Some(t), None) => EventTiming::Absolute(checked_time(&id, t)?),
            (None, Some(t)) => EventTiming::Relative(checked_time(&id, t)?),
            (None, None) => EventTiming::default(),
        };

        let mut kind = self.kind;
        if let Some(requested) = self.comparator {
            match &mut kind {
                EventKind::Agent { comparator, .. } => *comparator = Some(requested),
                other => {
                    return Err(GraphError::ComparatorNotAllowed {
                        event: id,
                        event_type: other.event_type(),
                    })
                }
            }
        }

        let mut dependencies: Vec<EventId> = Vec::with_capacity(self.dependencies.len());
        for dep in self.dependencies {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }

        Ok(Event {
            id,
            kind,
            timing,
            dependencies,
            successors: Vec::new(),
        })
    }

    /// Resolve the id: requested or freshly generated
    pub(crate) fn take_id(&mut self) -> EventId {
        self.id
            .take()
            .unwrap_or_else(|| EventId::generate(self.kind.event_type()))
    }
}

impl From<&EventId> for EventId {
    fn from(id: &EventId) -> Self {
        id.clone()
    }
}

fn checked_time(id: &EventId, value: f64) -> Result<f64> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(GraphError::InvalidTime {
            event: id.clone(),
            value,
        })
    }
}
