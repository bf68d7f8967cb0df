//! Embedding backend selected by `[embedding]`.

use runtime::{EmbedError, Embedder, HashingEmbedder, HttpEmbedder};

pub enum ConfiguredEmbedder {
    Hashing(HashingEmbedder),
    Http(HttpEmbedder),
}

impl std::fmt::Display for ConfiguredEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hashing(e) => write!(f, "hashing({})", e.dimensions()),
            Self::Http(e) => write!(f, "{e}"),
        }
    }
}

impl Embedder for ConfiguredEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        match self {
            Self::Hashing(e) => e.embed(text).await,
            Self::Http(e) => e.embed(text).await,
        }
    }
}
