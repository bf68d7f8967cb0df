//! Interactive approval of held tool calls.

use async_trait::async_trait;
use runtime::{Approval, ApprovalProvider, ApprovalRequest};
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::console::Console;

/// Asks on the terminal before a held tool call runs.
pub struct ConsoleApproval<R> {
    console: Arc<Console<R>>,
}

impl<R> ConsoleApproval<R> {
    pub fn new(console: Arc<Console<R>>) -> Self {
        Self { console }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send + 'static> ApprovalProvider for ConsoleApproval<R> {
    async fn review(&self, request: ApprovalRequest<'_>) -> Approval {
        let prompt = format!(
            "\nApprove {} ({})?\n  arguments: {}\n[y/N] ",
            request.tool, request.description, request.arguments
        );

        match self.console.read_line(&prompt).await {
            Ok(Some(line)) if is_yes(&line) => Approval::Approved,
            Ok(Some(_)) => Approval::rejected("declined by user"),
            Ok(None) => Approval::rejected("no answer before end of input"),
            Err(e) => Approval::rejected(format!("could not read answer: {e}")),
        }
    }
}

fn is_yes(line: &str) -> bool {
    matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
