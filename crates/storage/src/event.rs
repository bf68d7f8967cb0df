//! Event types for the run journal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// A unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

/// The role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// The kind of event that occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Session started.
    SessionStart,
    /// A new request entered the dispatcher.
    RunStart { query: String },
    /// The tool subset bound for the current request.
    ToolsSelected { tools: Vec<String> },
    /// A text message was added to the conversation.
    Message { role: Role, content: String },
    /// A tool was invoked.
    ToolCall {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// A tool returned a result (or an error payload).
    ToolResult {
        id: String,
        name: String,
        output: serde_json::Value,
        is_error: bool,
    },
    /// The request reached a terminal state.
    RunEnd {
        outcome: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Session ended.
    SessionEnd,
}

impl EventKind {
    /// Stable name stored in the `kind` column and used for filtering.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::RunStart { .. } => "run_start",
            EventKind::ToolsSelected { .. } => "tools_selected",
            EventKind::Message { .. } => "message",
            EventKind::ToolCall { .. } => "tool_call",
            EventKind::ToolResult { .. } => "tool_result",
            EventKind::RunEnd { .. } => "run_end",
            EventKind::SessionEnd => "session_end",
        }
    }
}

/// An event in the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    pub fn new(session_id: SessionId, kind: EventKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            timestamp: Utc::now(),
            kind,
        }
    }

    pub fn message(session_id: SessionId, role: Role, content: impl Into<String>) -> Self {
        Self::new(
            session_id,
            EventKind::Message {
                role,
                content: content.into(),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_parses_display() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn event_kind_is_tagged() {
        let kind = EventKind::RunEnd {
            outcome: "aborted".into(),
            detail: Some("budget_exceeded".into()),
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["kind"], "run_end");
        assert_eq!(json["detail"], "budget_exceeded");
        assert_eq!(kind.name(), "run_end");
    }
}
