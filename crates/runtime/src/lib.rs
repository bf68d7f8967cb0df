//! Toolgate runtime: retrieval-gated tool dispatch.
//!
//! A request is answered by a bounded loop between a model backend and a
//! catalog of tools. Before the loop starts, a semantic [`ToolIndex`] picks
//! the few tools the request likely needs, and only those are shown to the
//! model.
//!
//! # Overview
//!
//! - **ToolCatalog**: every invocable tool, keyed by [`ToolId`].
//! - **ToolIndex**: nearest-neighbour lookup from request text to tool subsets.
//! - **Dispatcher**: the `SelectingTools -> Reasoning -> AwaitingToolResult`
//!   state machine, with policy, approval, and cancellation.
//! - **Session**: a conversation whose runs are journaled to an `EventStore`.
//!
//! # Example
//!
//! ```ignore
//! use runtime::{AnthropicAuth, AnthropicBackend, Dispatcher, HashingEmbedder, ToolIndex};
//! use std::sync::Arc;
//!
//! # async fn example(catalog: runtime::ToolCatalog, corpus: Vec<runtime::IndexEntry>) -> runtime::Result<()> {
//! let backend = AnthropicBackend::builder(AnthropicAuth::ApiKey("sk-ant-...".into()), "claude-sonnet-4-5").build();
//! let index = ToolIndex::build(HashingEmbedder::default(), corpus, 0.35).await?;
//! let dispatcher = Dispatcher::builder(backend, Arc::new(catalog), Arc::new(index)).build()?;
//!
//! let state = dispatcher.run("What is the weather in Seattle?").await?;
//! println!("{:?}", state.final_answer());
//! # Ok(())
//! # }
//! ```

pub mod approval;
pub mod artifacts;
mod catalog;
pub mod conversation;
mod dispatcher;
mod error;
pub mod index;
pub mod model;
pub mod providers;
mod session;
pub mod tools;

#[cfg(test)]
mod testing;

pub use approval::{Approval, ApprovalProvider, ApprovalRequest, AutoApprove, RejectAll};
pub use artifacts::{Artifact, ArtifactSink, DirectoryArtifactSink, MemoryArtifactSink};
pub use catalog::ToolCatalog;
pub use conversation::{AbortReason, ConversationState, Message, Outcome, Phase, ToolOutcome};
pub use dispatcher::{Dispatcher, DispatcherBuilder, DispatcherConfig};
pub use error::{Error, Result};
pub use index::{
    DEFAULT_SIMILARITY_FLOOR, EmbedError, Embedder, IndexEntry, IndexMatch, ToolIndex,
};
pub use model::{Backend, ModelError, ModelReply, ModelRequest, ToolCall, ToolSchema, Usage};
pub use providers::{AnthropicAuth, AnthropicBackend, HashingEmbedder, HttpEmbedder};
pub use session::Session;
pub use tools::{ToolContext, ToolError, ToolHandler, ToolId, ToolSpec, tool_fn, typed_tool};
