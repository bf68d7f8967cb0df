//! Conversation state owned by one session.

use crate::model::Usage;
use crate::tools::{ToolError, ToolId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ToolOutcome {
    Success { output: Value },
    Error { error: ToolError },
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Text form handed back to the model.
    pub fn to_model_text(&self) -> String {
        match self {
            Self::Success {
                output: Value::String(text),
            } => text.clone(),
            Self::Success { output } => output.to_string(),
            Self::Error { error } => error.to_string(),
        }
    }
}

impl From<Result<Value, ToolError>> for ToolOutcome {
    fn from(result: Result<Value, ToolError>) -> Self {
        match result {
            Ok(output) => Self::Success { output },
            Err(error) => Self::Error { error },
        }
    }
}

/// One entry in the conversation. Order is the model's context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    UserText {
        text: String,
    },
    ModelText {
        text: String,
    },
    ToolInvocationRequest {
        call_id: String,
        tool_id: ToolId,
        arguments: Value,
    },
    ToolResult {
        call_id: String,
        tool_id: ToolId,
        output: ToolOutcome,
    },
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self::UserText { text: text.into() }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::ModelText { text: text.into() }
    }

    /// Whether the model authored this entry.
    pub fn is_from_model(&self) -> bool {
        matches!(
            self,
            Self::ModelText { .. } | Self::ToolInvocationRequest { .. }
        )
    }
}

/// Dispatcher state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    SelectingTools,
    Reasoning,
    AwaitingApproval,
    AwaitingToolResult,
    Done,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Aborted)
    }
}

/// Why a run stopped without an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// The model kept requesting tools past the loop bound.
    BudgetExceeded { limit: usize },
    /// The model requested a tool that was not bound for this request.
    ProtocolViolation { tool: String },
    /// The embedding backend behind the tool index failed.
    IndexUnavailable { message: String },
    /// The caller cancelled the run.
    Cancelled,
}

impl AbortReason {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::IndexUnavailable { .. } => "index_unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BudgetExceeded { limit } => write!(f, "budget_exceeded (limit {limit})"),
            Self::ProtocolViolation { tool } => write!(f, "protocol_violation (unbound tool {tool})"),
            Self::IndexUnavailable { message } => write!(f, "index_unavailable ({message})"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Terminal result of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Outcome {
    Done { answer: String },
    Aborted { reason: AbortReason },
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }

    /// `"done"` or the abort reason's tag.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Done { .. } => "done",
            Self::Aborted { reason } => reason.tag(),
        }
    }
}

/// Messages and tool binding for one session.
///
/// Owned by exactly one run at a time; the dispatcher takes it by `&mut`.
#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: Vec<Message>,
    bound_tools: Vec<ToolId>,
    phases: Vec<Phase>,
    outcome: Option<Outcome>,
    usage: Usage,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Tools available to the model for the current request.
    pub fn bound_tools(&self) -> &[ToolId] {
        &self.bound_tools
    }

    pub fn is_bound(&self, tool: &str) -> bool {
        self.bound_tools.iter().any(|id| id == tool)
    }

    /// Phases entered during the latest request, in order.
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase(&self) -> Option<Phase> {
        self.phases.last().copied()
    }

    /// Terminal outcome of the latest request, if it finished.
    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.as_ref()
    }

    /// Token usage accumulated over the whole session.
    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn final_answer(&self) -> Option<&str> {
        match &self.outcome {
            Some(Outcome::Done { answer }) => Some(answer),
            _ => None,
        }
    }

    /// Identifiers of every tool the model requested, in order.
    pub fn requested_tools(&self) -> Vec<&ToolId> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolInvocationRequest { tool_id, .. } => Some(tool_id),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn begin_request(&mut self) {
        self.phases.clear();
        self.outcome = None;
        self.enter(Phase::SelectingTools);
    }

    pub(crate) fn enter(&mut self, phase: Phase) {
        self.phases.push(phase);
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub(crate) fn bind_tools(&mut self, tools: Vec<ToolId>) {
        self.bound_tools = tools;
    }

    pub(crate) fn add_usage(&mut self, usage: Usage) {
        self.usage.accumulate(usage);
    }

    pub(crate) fn complete(&mut self, answer: String) {
        self.enter(Phase::Done);
        self.outcome = Some(Outcome::Done { answer });
    }

    pub(crate) fn abort(&mut self, reason: AbortReason) {
        self.enter(Phase::Aborted);
        self.outcome = Some(Outcome::Aborted { reason });
    }
}
