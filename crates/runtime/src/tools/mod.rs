//! Tool definitions and handlers.

pub mod errors;
mod r#trait;
mod types;

pub use errors::ToolError;
pub use r#trait::{FnHandler, ToolHandler, TypedHandler, tool_fn, typed_tool};
pub use types::{ToolContext, ToolId, ToolSpec};
