//! Tool catalog.

use crate::model::ToolSchema;
use crate::tools::{ToolId, ToolSpec};
use crate::{Error, Result};
use std::collections::BTreeMap;

/// The authoritative set of invocable tools.
///
/// Built once at startup and read-only afterwards; share it behind an `Arc`.
#[derive(Debug, Default, Clone)]
pub struct ToolCatalog {
    tools: BTreeMap<ToolId, ToolSpec>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Identifiers are unique.
    pub fn register(&mut self, spec: ToolSpec) -> Result<()> {
        if self.tools.contains_key(spec.id()) {
            return Err(Error::DuplicateTool(spec.id().to_string()));
        }
        self.tools.insert(spec.id().clone(), spec);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, spec: ToolSpec) -> Result<Self> {
        self.register(spec)?;
        Ok(self)
    }

    /// Look up a tool by identifier.
    pub fn resolve(&self, id: &str) -> Result<&ToolSpec> {
        self.tools
            .get(id)
            .ok_or_else(|| Error::UnknownTool(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// All identifiers in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &ToolId> {
        self.tools.keys()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Model-facing schemas for the given tools, in the given order.
    pub fn schemas(&self, ids: &[ToolId]) -> Result<Vec<ToolSchema>> {
        ids.iter()
            .map(|id| self.resolve(id.as_str()).map(ToolSpec::schema))
            .collect()
    }
}
