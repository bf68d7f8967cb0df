//! Policy configuration and enforcement.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Policy configuration loaded from TOML.
///
/// Evaluation order: `deny` wins over everything, then `approve`, then
/// `allow`. A tool matched by none of them is denied.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Policy {
    /// Tools that may run without confirmation.
    #[serde(default)]
    pub allow: AllowRules,

    /// Tools that must never run (overrides allow and approve).
    #[serde(default)]
    pub deny: DenyRules,

    /// Tools that need an explicit approval before each call.
    #[serde(default)]
    pub approve: ApproveRules,
}

/// Rules for allowed tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowRules {
    /// Tool name patterns (`*`, `prefix*`, or exact name).
    #[serde(default = "allow_everything")]
    pub tools: Vec<String>,
}

impl Default for AllowRules {
    fn default() -> Self {
        Self {
            tools: allow_everything(),
        }
    }
}

fn allow_everything() -> Vec<String> {
    vec!["*".to_string()]
}

/// Rules for denied tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DenyRules {
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Rules for tools that require approval.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApproveRules {
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Result of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    RequireApproval,
    Deny { reason: String },
}

impl Decision {
    pub fn is_denied(&self) -> bool {
        matches!(self, Decision::Deny { .. })
    }
}

impl Policy {
    /// Load policy from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy from TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        let policy: Self = toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Allow every tool without confirmation.
    pub fn permissive() -> Self {
        Self::default()
    }

    /// Require approval for every tool call.
    pub fn restrictive() -> Self {
        Self {
            allow: AllowRules { tools: Vec::new() },
            deny: DenyRules::default(),
            approve: ApproveRules {
                tools: allow_everything(),
            },
        }
    }

    /// Reject empty patterns, which would otherwise silently match nothing.
    pub fn validate(&self) -> Result<()> {
        let all = self
            .allow
            .tools
            .iter()
            .chain(&self.deny.tools)
            .chain(&self.approve.tools);
        for pattern in all {
            if pattern.trim().is_empty() {
                return Err(Error::Invalid("empty tool pattern".to_string()));
            }
        }
        Ok(())
    }

    /// Classify a call to the named tool.
    pub fn check(&self, tool: &str) -> Decision {
        if let Some(pattern) = first_match(&self.deny.tools, tool) {
            return Decision::Deny {
                reason: format!("{tool} is denied by policy (rule: {pattern})"),
            };
        }

        if first_match(&self.approve.tools, tool).is_some() {
            return Decision::RequireApproval;
        }

        if first_match(&self.allow.tools, tool).is_some() {
            Decision::Allow
        } else {
            Decision::Deny {
                reason: format!("{tool} not in allowlist"),
            }
        }
    }
}

fn first_match<'a>(patterns: &'a [String], tool: &str) -> Option<&'a str> {
    patterns
        .iter()
        .map(String::as_str)
        .find(|pattern| matches_pattern(pattern, tool))
}

/// `*` matches everything, a trailing `*` is a prefix match, anything else
/// must match exactly.
fn matches_pattern(pattern: &str, tool: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => tool.starts_with(prefix),
        None => pattern == tool,
    }
}
