//! Journaled conversation sessions.

use crate::conversation::{ConversationState, Message, Outcome, ToolOutcome};
use crate::dispatcher::Dispatcher;
use crate::index::Embedder;
use crate::model::Backend;
use crate::{Phase, Result};
use serde_json::Value;
use std::sync::Arc;
use storage::{Event, EventKind, EventStore, Role, SessionId};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// A conversation whose requests are run by a [`Dispatcher`] and recorded in
/// an [`EventStore`].
pub struct Session<B, E> {
    pub id: SessionId,
    store: EventStore,
    dispatcher: Arc<Dispatcher<B, E>>,
    state: ConversationState,
}

impl<B: Backend, E: Embedder> Session<B, E> {
    /// Start a new session and record its start.
    pub fn new(store: EventStore, dispatcher: Arc<Dispatcher<B, E>>) -> Result<Self> {
        let id = SessionId::new();
        store.append(&Event::new(id, EventKind::SessionStart))?;

        Ok(Self {
            id,
            store,
            dispatcher,
            state: ConversationState::new(),
        })
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    /// Run one request as the next turn of this conversation.
    pub async fn ask(&mut self, query: &str) -> Result<Outcome> {
        self.ask_with_cancel(query, &CancellationToken::new()).await
    }

    /// Like [`ask`](Self::ask), stopping early when `cancel` fires.
    ///
    /// Everything the run appended is journaled, also when it fails.
    pub async fn ask_with_cancel(
        &mut self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let before = self.state.messages().len();
        let result = self.dispatcher.run_in(&mut self.state, query, cancel).await;

        let mut events = vec![Event::new(
            self.id,
            EventKind::RunStart {
                query: query.to_string(),
            },
        )];
        if self.state.phases().contains(&Phase::Reasoning) {
            events.push(Event::new(
                self.id,
                EventKind::ToolsSelected {
                    tools: self.state.bound_tools().iter().map(|t| t.to_string()).collect(),
                },
            ));
        }
        events.extend(
            self.state.messages()[before..]
                .iter()
                .map(|message| Event::new(self.id, event_kind(message))),
        );

        let end = match (&result, self.state.outcome()) {
            (Err(err), _) => EventKind::RunEnd {
                outcome: "error".into(),
                detail: Some(err.to_string()),
            },
            (Ok(()), Some(Outcome::Aborted { reason })) => EventKind::RunEnd {
                outcome: "aborted".into(),
                detail: Some(reason.to_string()),
            },
            (Ok(()), _) => EventKind::RunEnd {
                outcome: "done".into(),
                detail: None,
            },
        };
        events.push(Event::new(self.id, end));

        debug!(session = %self.id, events = events.len(), "journaling run");
        self.store.append_all(&events)?;

        result?;
        Ok(self
            .state
            .outcome()
            .cloned()
            .unwrap_or(Outcome::Done {
                answer: String::new(),
            }))
    }

    /// Record the end of the session and hand the store back.
    pub fn end(self) -> Result<EventStore> {
        self.store
            .append(&Event::new(self.id, EventKind::SessionEnd))?;
        Ok(self.store)
    }
}

fn event_kind(message: &Message) -> EventKind {
    match message {
        Message::UserText { text } => EventKind::Message {
            role: Role::User,
            content: text.clone(),
        },
        Message::ModelText { text } => EventKind::Message {
            role: Role::Assistant,
            content: text.clone(),
        },
        Message::ToolInvocationRequest {
            call_id,
            tool_id,
            arguments,
        } => EventKind::ToolCall {
            id: call_id.clone(),
            name: tool_id.to_string(),
            input: arguments.clone(),
        },
        Message::ToolResult {
            call_id,
            tool_id,
            output,
        } => EventKind::ToolResult {
            id: call_id.clone(),
            name: tool_id.to_string(),
            output: match output {
                ToolOutcome::Success { output } => output.clone(),
                ToolOutcome::Error { error } => Value::String(error.to_string()),
            },
            is_error: output.is_error(),
        },
    }
}
