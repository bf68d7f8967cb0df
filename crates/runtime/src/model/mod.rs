//! Model inference boundary.

pub mod errors;
pub mod types;

pub use errors::ModelError;
pub use types::{Backend, ModelReply, ModelRequest, ToolCall, ToolSchema, Usage};
