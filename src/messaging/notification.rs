// Queue notifications emitted by the command engine

use crate::command::session::SessionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of state change a notification reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueueAction {
    Enqueued,
    Applied,
    Dequeued,
    UndoPerformed,
    RedoPerformed,
    QueuePushed,
    QueuePopped,
}

impl fmt::Display for QueueAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueAction::Enqueued => "enqueued",
            QueueAction::Applied => "applied",
            QueueAction::Dequeued => "dequeued",
            QueueAction::UndoPerformed => "undo",
            QueueAction::RedoPerformed => "redo",
            QueueAction::QueuePushed => "queue pushed",
            QueueAction::QueuePopped => "queue popped",
        };
        f.write_str(name)
    }
}

/// Notification with timestamp and the session it concerns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub action: QueueAction,
    pub session: SessionId,
    pub timestamp: DateTime<Utc>,
}

impl QueueEvent {
    /// Create a new event stamped with the current time
    pub fn new(action: QueueAction, session: SessionId) -> Self {
        Self {
            action,
            session,
            timestamp: Utc::now(),
        }
    }

    /// True if the event is younger than `max_age_ms` milliseconds
    pub fn is_recent(&self, max_age_ms: i64) -> bool {
        (Utc::now() - self.timestamp).num_milliseconds() < max_age_ms
    }
}
