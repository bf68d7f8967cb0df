//! Human-in-the-loop approval of tool calls.
//!
//! When policy marks a tool as requiring approval, the dispatcher enters
//! `AwaitingApproval` and asks an [`ApprovalProvider`] before running it.

use crate::tools::ToolId;
use async_trait::async_trait;
use serde_json::Value;

/// What the approver sees.
#[derive(Debug, Clone, Copy)]
pub struct ApprovalRequest<'a> {
    pub call_id: &'a str,
    pub tool: &'a ToolId,
    pub description: &'a str,
    pub arguments: &'a Value,
}

/// The approver's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approval {
    Approved,
    Rejected { reason: String },
}

impl Approval {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected {
            reason: reason.into(),
        }
    }
}

/// Decides whether a held tool call may run.
#[async_trait]
pub trait ApprovalProvider: Send + Sync {
    async fn review(&self, request: ApprovalRequest<'_>) -> Approval;
}

/// Approves everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApprove;

#[async_trait]
impl ApprovalProvider for AutoApprove {
    async fn review(&self, _request: ApprovalRequest<'_>) -> Approval {
        Approval::Approved
    }
}

/// Rejects everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

#[async_trait]
impl ApprovalProvider for RejectAll {
    async fn review(&self, request: ApprovalRequest<'_>) -> Approval {
        Approval::rejected(format!("no approver available for {}", request.tool))
    }
}
