//! Concrete model and embedding backends.

mod anthropic;
mod embeddings;

pub use anthropic::{AnthropicAuth, AnthropicBackend, AnthropicBackendBuilder};
pub use embeddings::{DEFAULT_DIMENSIONS, DEFAULT_EMBED_TIMEOUT, HashingEmbedder, HttpEmbedder};
