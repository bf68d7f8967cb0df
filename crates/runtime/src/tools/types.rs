//! Tool-related types.

use super::ToolHandler;
use crate::artifacts::{ArtifactSink, MemoryArtifactSink};
use crate::model::ToolSchema;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_TOOL_ID_LEN: usize = 64;

/// Identifier of a registered tool.
///
/// Restricted to `[A-Za-z0-9_-]{1,64}`, the set every provider accepts as a
/// tool name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolId(String);

impl ToolId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let valid = !id.is_empty()
            && id.len() <= MAX_TOOL_ID_LEN
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if valid {
            Ok(Self(id))
        } else {
            Err(Error::InvalidToolId(id))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ToolId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<ToolId> for String {
    fn from(id: ToolId) -> Self {
        id.0
    }
}

// Ord and Hash are derived from the inner string, so lookups by `&str` agree.
impl std::borrow::Borrow<str> for ToolId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ToolId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ToolId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ToolId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// A registered tool: identity, model-facing description, and handler.
///
/// Immutable once built; clones share the handler.
#[derive(Clone)]
pub struct ToolSpec {
    id: ToolId,
    description: String,
    input_schema: Value,
    handler: Arc<dyn ToolHandler>,
    timeout: Option<Duration>,
}

impl ToolSpec {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: impl ToolHandler + 'static,
    ) -> Result<Self> {
        Ok(Self {
            id: ToolId::new(id)?,
            description: description.into(),
            input_schema,
            handler: Arc::new(handler),
            timeout: None,
        })
    }

    /// Override the dispatcher-wide timeout for this tool.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn id(&self) -> &ToolId {
        &self.id
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn input_schema(&self) -> &Value {
        &self.input_schema
    }

    pub fn handler(&self) -> &Arc<dyn ToolHandler> {
        &self.handler
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The definition sent to the model.
    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.id.to_string(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Per-run context handed to every handler.
#[derive(Clone)]
pub struct ToolContext {
    /// Cancelled when the owning run is cancelled.
    pub cancellation: CancellationToken,
    /// Where handlers put files they produce.
    pub artifacts: Arc<dyn ArtifactSink>,
}

impl ToolContext {
    pub fn new(cancellation: CancellationToken, artifacts: Arc<dyn ArtifactSink>) -> Self {
        Self {
            cancellation,
            artifacts,
        }
    }

    /// A context with a fresh token and an in-memory sink, for calling
    /// handlers outside a dispatcher.
    pub fn detached() -> Self {
        Self::new(
            CancellationToken::new(),
            Arc::new(MemoryArtifactSink::default()),
        )
    }
}
