//! Artifact sinks.
//!
//! Tools that produce files (rendered charts, generated code) hand them to
//! an [`ArtifactSink`] from their [`ToolContext`](crate::ToolContext)
//! instead of writing to disk themselves.

use crate::tools::ToolError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// A file produced by a tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl Artifact {
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            bytes,
        }
    }
}

/// Destination for tool artifacts.
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store the artifact and return where it ended up.
    async fn store(&self, artifact: Artifact) -> Result<String, ToolError>;
}

/// Keeps artifacts in memory.
#[derive(Debug, Default)]
pub struct MemoryArtifactSink {
    items: Mutex<Vec<Artifact>>,
}

impl MemoryArtifactSink {
    pub async fn artifacts(&self) -> Vec<Artifact> {
        self.items.lock().await.clone()
    }
}

#[async_trait]
impl ArtifactSink for MemoryArtifactSink {
    async fn store(&self, artifact: Artifact) -> Result<String, ToolError> {
        let location = format!("memory:{}", artifact.name);
        self.items.lock().await.push(artifact);
        Ok(location)
    }
}

/// Writes artifacts as files under a root directory.
#[derive(Debug, Clone)]
pub struct DirectoryArtifactSink {
    root: PathBuf,
}

impl DirectoryArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl ArtifactSink for DirectoryArtifactSink {
    async fn store(&self, artifact: Artifact) -> Result<String, ToolError> {
        let file_name = sanitize_file_name(&artifact.name)?;
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| ToolError::Execution(format!("create {}: {e}", self.root.display())))?;
        let path = self.root.join(file_name);
        tokio::fs::write(&path, &artifact.bytes)
            .await
            .map_err(|e| ToolError::Execution(format!("write {}: {e}", path.display())))?;
        Ok(path.display().to_string())
    }
}

/// Artifact names come from tools, so they must not escape the root.
fn sanitize_file_name(name: &str) -> Result<&str, ToolError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if bad {
        Err(ToolError::InvalidInput(format!("invalid artifact name: {name:?}")))
    } else {
        Ok(name)
    }
}
