//! Hints attached to task and environment events

use crate::event::{Event, EventId, EventType};
use serde::{Deserialize, Serialize};

/// What a hint explains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HintKind {
    /// Guidance for a task handed to the agent
    Task,
    /// Explanation of an environment change
    Environment,
}

impl HintKind {
    /// Hint kind an event carries, if any
    #[must_use]
    pub fn for_event(event: &Event) -> Option<Self> {
        if event.is_send_message_to_agent() {
            Some(Self::Task)
        } else if event.event_type() == EventType::Env {
            Some(Self::Environment)
        } else {
            None
        }
    }
}

/// Free-text hint kept in lockstep with its event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    /// Hinted event
    pub event_id: EventId,
    /// Hint kind
    pub kind: HintKind,
    /// Hint text
    pub content: String,
}

impl Hint {
    pub(crate) fn for_event(kind: HintKind, event: &Event) -> Self {
        let content = match (kind, event.action()) {
            (HintKind::Task, Some(action)) => action
                .args
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_owned(),
            (HintKind::Environment, Some(action)) => format!("{}.{}", action.app, action.function),
            (_, None) => String::new(),
        };
        Self {
            event_id: event.id().clone(),
            kind,
            content,
        }
    }
}
