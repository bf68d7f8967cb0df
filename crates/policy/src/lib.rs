//! Tool execution policy.
//!
//! Core principle: **No tool runs without passing a policy check.**
//!
//! A [`Policy`] classifies each requested tool call as allowed, denied, or
//! held for explicit approval. Rules are tool-name patterns loaded from TOML.

mod error;
mod policy;

pub use error::{Error, Result};
pub use policy::{AllowRules, ApproveRules, Decision, DenyRules, Policy};
