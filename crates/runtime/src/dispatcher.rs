//! Retrieval-gated tool dispatcher.
//!
//! One request runs the state machine
//!
//! ```text
//! SelectingTools -> Reasoning -> [AwaitingApproval] -> AwaitingToolResult -> Reasoning -> ... -> Done | Aborted
//! ```
//!
//! The tool index picks a subset of the catalog, only that subset is shown
//! to the model, and the loop ends when the model answers in text or the
//! iteration bound is reached. Normal "could not finish" endings are
//! [`Outcome::Aborted`] values, not errors.

use crate::approval::{Approval, ApprovalProvider, ApprovalRequest, AutoApprove};
use crate::artifacts::{ArtifactSink, MemoryArtifactSink};
use crate::catalog::ToolCatalog;
use crate::conversation::{AbortReason, ConversationState, Message, ToolOutcome};
use crate::index::{Embedder, ToolIndex};
use crate::model::{Backend, ModelRequest, ToolCall};
use crate::tools::{ToolContext, ToolError, ToolId, ToolSpec};
use crate::{Error, Phase, Result};
use futures::future::join_all;
use policy::{Decision, Policy};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 8;
pub const DEFAULT_TOP_K: usize = 1;
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Loop and execution limits.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum `Reasoning -> AwaitingToolResult` transitions per request.
    pub max_iterations: usize,
    /// How many index entries contribute tools.
    pub top_k: usize,
    /// Run the calls of one model turn concurrently.
    pub parallel_tool_calls: bool,
    /// Applied to every handler without its own timeout.
    pub tool_timeout: Duration,
    pub system_prompt: Option<String>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            top_k: DEFAULT_TOP_K,
            parallel_tool_calls: false,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            system_prompt: None,
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::Config("max_iterations must be at least 1".into()));
        }
        if self.top_k == 0 {
            return Err(Error::Config("top_k must be at least 1".into()));
        }
        if self.tool_timeout.is_zero() {
            return Err(Error::Config("tool_timeout must be positive".into()));
        }
        Ok(())
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder<B, E> {
    backend: B,
    catalog: Arc<ToolCatalog>,
    index: Arc<ToolIndex<E>>,
    policy: Policy,
    approvals: Arc<dyn ApprovalProvider>,
    artifacts: Arc<dyn ArtifactSink>,
    config: DispatcherConfig,
}

impl<B: Backend, E: Embedder> DispatcherBuilder<B, E> {
    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn approvals(mut self, approvals: Arc<dyn ApprovalProvider>) -> Self {
        self.approvals = approvals;
        self
    }

    pub fn artifacts(mut self, artifacts: Arc<dyn ArtifactSink>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Validate the config and check that every tool the index can select
    /// is registered.
    pub fn build(self) -> Result<Dispatcher<B, E>> {
        self.config.validate()?;
        for entry in self.index.entries() {
            for tool in &entry.tools {
                self.catalog.resolve(tool.as_str())?;
                if self.policy.check(tool.as_str()).is_denied() {
                    warn!(
                        %tool,
                        pattern = %entry.query_pattern,
                        "index selects a tool the policy denies"
                    );
                }
            }
        }

        Ok(Dispatcher {
            backend: self.backend,
            catalog: self.catalog,
            index: self.index,
            policy: self.policy,
            approvals: self.approvals,
            artifacts: self.artifacts,
            config: self.config,
        })
    }
}

/// Runs the bounded request / tool-call / response loop.
///
/// Catalog and index are shared read-only; each run owns its
/// [`ConversationState`], so one dispatcher can serve concurrent runs.
pub struct Dispatcher<B, E> {
    backend: B,
    catalog: Arc<ToolCatalog>,
    index: Arc<ToolIndex<E>>,
    policy: Policy,
    approvals: Arc<dyn ApprovalProvider>,
    artifacts: Arc<dyn ArtifactSink>,
    config: DispatcherConfig,
}

/// A validated call waiting to execute, or already settled by policy.
struct PlannedCall<'a> {
    call: &'a ToolCall,
    tool_id: ToolId,
    spec: &'a ToolSpec,
    verdict: std::result::Result<(), ToolError>,
}

impl<B: Backend, E: Embedder> Dispatcher<B, E> {
    pub fn builder(
        backend: B,
        catalog: Arc<ToolCatalog>,
        index: Arc<ToolIndex<E>>,
    ) -> DispatcherBuilder<B, E> {
        DispatcherBuilder {
            backend,
            catalog,
            index,
            policy: Policy::permissive(),
            approvals: Arc::new(AutoApprove),
            artifacts: Arc::new(MemoryArtifactSink::default()),
            config: DispatcherConfig::default(),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn index(&self) -> &ToolIndex<E> {
        &self.index
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Handle one request in a fresh conversation.
    pub async fn run(&self, query: &str) -> Result<ConversationState> {
        self.run_with_cancel(query, &CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), stopping early when `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<ConversationState> {
        let mut state = ConversationState::new();
        self.run_in(&mut state, query, cancel).await?;
        Ok(state)
    }

    /// Handle one request as the next turn of an existing conversation.
    ///
    /// Returns `Err` only for configuration or model-backend failures; the
    /// conversation then holds whatever was appended before the failure.
    #[instrument(skip_all, fields(query = %query))]
    pub async fn run_in(
        &self,
        state: &mut ConversationState,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        state.begin_request();
        state.push(Message::user(query));

        if cancel.is_cancelled() {
            return self.abort(state, AbortReason::Cancelled);
        }

        let selected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            selected = self.index.lookup(query, self.config.top_k) => Some(selected),
        };
        let subsets = match selected {
            None => return self.abort(state, AbortReason::Cancelled),
            Some(Err(Error::IndexUnavailable(message))) => {
                return self.abort(state, AbortReason::IndexUnavailable { message });
            }
            Some(other) => other?,
        };

        let mut bound: Vec<ToolId> = Vec::new();
        for tool in subsets.into_iter().flatten() {
            self.catalog.resolve(tool.as_str())?;
            if !bound.contains(&tool) {
                bound.push(tool);
            }
        }
        info!(tools = ?bound, "tools selected");
        let schemas = self.catalog.schemas(&bound)?;
        state.bind_tools(bound);

        let mut transitions = 0usize;
        loop {
            state.enter(Phase::Reasoning);
            if cancel.is_cancelled() {
                return self.abort(state, AbortReason::Cancelled);
            }

            let reply = {
                let request = ModelRequest {
                    system: self.config.system_prompt.as_deref(),
                    messages: state.messages(),
                    tools: &schemas,
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    reply = self.backend.call(request) => Some(reply),
                }
            };
            let Some(reply) = reply else {
                return self.abort(state, AbortReason::Cancelled);
            };
            let reply = reply?;
            state.add_usage(reply.usage);

            let text = reply.text.filter(|t| !t.trim().is_empty());
            if let Some(text) = &text {
                state.push(Message::model(text.clone()));
            }

            if reply.tool_calls.is_empty() {
                let answer = text.unwrap_or_default();
                info!(transitions, "run done");
                state.complete(answer);
                return Ok(());
            }

            if let Some(unbound) = reply.tool_calls.iter().find(|c| !state.is_bound(&c.name)) {
                warn!(tool = %unbound.name, "model requested an unbound tool");
                let tool = unbound.name.clone();
                return self.abort(state, AbortReason::ProtocolViolation { tool });
            }

            if transitions >= self.config.max_iterations {
                warn!(limit = self.config.max_iterations, "loop budget exhausted");
                let limit = self.config.max_iterations;
                return self.abort(state, AbortReason::BudgetExceeded { limit });
            }
            transitions += 1;

            let mut planned = Vec::with_capacity(reply.tool_calls.len());
            for call in &reply.tool_calls {
                let spec = self.catalog.resolve(&call.name)?;
                state.push(Message::ToolInvocationRequest {
                    call_id: call.id.clone(),
                    tool_id: spec.id().clone(),
                    arguments: call.input.clone(),
                });
                planned.push(PlannedCall {
                    call,
                    tool_id: spec.id().clone(),
                    spec,
                    verdict: Ok(()),
                });
            }

            let mut interrupted = false;
            for plan in &mut planned {
                plan.verdict = match self.policy.check(plan.tool_id.as_str()) {
                    Decision::Allow => Ok(()),
                    Decision::Deny { reason } => {
                        warn!(tool = %plan.tool_id, %reason, "tool call denied by policy");
                        Err(ToolError::Denied(format!("API call denied: {reason}")))
                    }
                    Decision::RequireApproval => {
                        state.enter(Phase::AwaitingApproval);
                        let request = ApprovalRequest {
                            call_id: &plan.call.id,
                            tool: &plan.tool_id,
                            description: plan.spec.description(),
                            arguments: &plan.call.input,
                        };
                        let approval = tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            approval = self.approvals.review(request) => Some(approval),
                        };
                        match approval {
                            None => {
                                interrupted = true;
                                break;
                            }
                            Some(Approval::Approved) => Ok(()),
                            Some(Approval::Rejected { reason }) => {
                                warn!(tool = %plan.tool_id, %reason, "tool call rejected by approver");
                                Err(ToolError::Denied(format!(
                                    "API call denied by approver: {reason}"
                                )))
                            }
                        }
                    }
                };
            }
            if interrupted {
                return self.abort_turn(state, &planned);
            }

            state.enter(Phase::AwaitingToolResult);
            let cx = ToolContext::new(cancel.child_token(), Arc::clone(&self.artifacts));
            let outcomes = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                outcomes = self.execute_all(&planned, &cx) => Some(outcomes),
            };
            let Some(outcomes) = outcomes else {
                return self.abort_turn(state, &planned);
            };

            for (plan, output) in planned.iter().zip(outcomes) {
                state.push(Message::ToolResult {
                    call_id: plan.call.id.clone(),
                    tool_id: plan.tool_id.clone(),
                    output,
                });
            }
        }
    }

    /// Execute a turn's calls; results come back in request order.
    async fn execute_all(&self, planned: &[PlannedCall<'_>], cx: &ToolContext) -> Vec<ToolOutcome> {
        if self.config.parallel_tool_calls {
            join_all(planned.iter().map(|plan| self.execute(plan, cx))).await
        } else {
            let mut outcomes = Vec::with_capacity(planned.len());
            for plan in planned {
                outcomes.push(self.execute(plan, cx).await);
            }
            outcomes
        }
    }

    async fn execute(&self, plan: &PlannedCall<'_>, cx: &ToolContext) -> ToolOutcome {
        if let Err(error) = &plan.verdict {
            return ToolOutcome::Error {
                error: error.clone(),
            };
        }

        let timeout = plan.spec.timeout().unwrap_or(self.config.tool_timeout);
        debug!(tool = %plan.tool_id, call_id = %plan.call.id, "executing tool");
        let result = tokio::time::timeout(
            timeout,
            plan.spec.handler().call(plan.call.input.clone(), cx),
        )
        .await
        .unwrap_or_else(|_| {
            let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
            Err(ToolError::Timeout(millis))
        });

        if let Err(error) = &result {
            warn!(tool = %plan.tool_id, %error, "tool failed");
        }
        ToolOutcome::from(result)
    }

    /// Cancel mid-turn. Every recorded request gets a result, so the
    /// conversation can be continued by a later request.
    fn abort_turn(
        &self,
        state: &mut ConversationState,
        planned: &[PlannedCall<'_>],
    ) -> Result<()> {
        for plan in planned {
            state.push(Message::ToolResult {
                call_id: plan.call.id.clone(),
                tool_id: plan.tool_id.clone(),
                output: ToolOutcome::Error {
                    error: ToolError::Cancelled,
                },
            });
        }
        self.abort(state, AbortReason::Cancelled)
    }

    fn abort(&self, state: &mut ConversationState, reason: AbortReason) -> Result<()> {
        info!(reason = reason.tag(), "run aborted");
        state.abort(reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::RejectAll;
    use crate::conversation::Outcome;
    use crate::index::{DEFAULT_SIMILARITY_FLOOR, IndexEntry};
    use crate::model::ModelReply;
    use crate::testing::{
        KeywordEmbedder, ScriptedBackend, SwitchableEmbedder, demo_catalog, weather_corpus,
    };
    use policy::DenyRules;
    use serde_json::json;

    async fn dispatcher(
        backend: ScriptedBackend,
    ) -> DispatcherBuilder<ScriptedBackend, KeywordEmbedder> {
        let index = ToolIndex::build(KeywordEmbedder, weather_corpus(), DEFAULT_SIMILARITY_FLOOR)
            .await
            .unwrap();
        Dispatcher::builder(backend, Arc::new(demo_catalog()), Arc::new(index))
    }

    fn tool_names(state: &ConversationState) -> Vec<&str> {
        state.requested_tools().into_iter().map(ToolId::as_str).collect()
    }

    fn results(state: &ConversationState) -> Vec<&ToolOutcome> {
        state
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult { output, .. } => Some(output),
                _ => None,
            })
            .collect()
    }

    fn aborted(state: &ConversationState) -> &AbortReason {
        match state.outcome() {
            Some(Outcome::Aborted { reason }) => reason,
            other => panic!("expected abort, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn weather_request_chains_two_tools() {
        let backend = ScriptedBackend::new([
            ModelReply::tool_call("c1", "get_lat_long", json!({"place": "Seattle"})),
            ModelReply::tool_call(
                "c2",
                "get_weather",
                json!({"latitude": 47.6062, "longitude": -122.3321}),
            ),
            ModelReply::text("It is 12.5 degrees in Seattle."),
        ]);
        let dispatcher = dispatcher(backend).await.build().unwrap();

        let state = dispatcher.run("find me the weather for Seattle").await.unwrap();

        assert_eq!(state.final_answer(), Some("It is 12.5 degrees in Seattle."));
        assert_eq!(tool_names(&state), ["get_lat_long", "get_weather"]);
        assert_eq!(
            state.phases(),
            [
                Phase::SelectingTools,
                Phase::Reasoning,
                Phase::AwaitingToolResult,
                Phase::Reasoning,
                Phase::AwaitingToolResult,
                Phase::Reasoning,
                Phase::Done,
            ]
        );
        assert_eq!(state.messages().len(), 6);
        assert!(matches!(&state.messages()[5], Message::ModelText { .. }));

        let outputs = results(&state);
        assert!(outputs.iter().all(|o| !o.is_error()));
        assert!(outputs[1].to_model_text().contains("12.5"));
    }

    #[tokio::test]
    async fn backend_only_sees_bound_tools() {
        let backend = ScriptedBackend::new([ModelReply::text("Sunny.")]);
        let config = DispatcherConfig {
            system_prompt: Some("Be brief.".into()),
            ..DispatcherConfig::default()
        };
        let dispatcher = dispatcher(backend).await.config(config).build().unwrap();

        let state = dispatcher.run("find me the weather for Seattle").await.unwrap();
        assert_eq!(state.bound_tools(), ["get_lat_long", "get_weather"]);

        let seen = dispatcher.backend.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].tools, ["get_lat_long", "get_weather"]);
        assert_eq!(seen[0].system.as_deref(), Some("Be brief."));
        assert_eq!(seen[0].messages, [Message::user("find me the weather for Seattle")]);
    }

    #[tokio::test]
    async fn unbound_tool_is_protocol_violation() {
        let backend = ScriptedBackend::new([ModelReply::tool_call(
            "c1",
            "get_weather",
            json!({"latitude": 0.0, "longitude": 0.0}),
        )]);
        let dispatcher = dispatcher(backend).await.build().unwrap();

        let state = dispatcher.run("find me the place called Seattle").await.unwrap();

        assert_eq!(state.bound_tools(), ["get_lat_long"]);
        assert_eq!(
            aborted(&state),
            &AbortReason::ProtocolViolation {
                tool: "get_weather".into()
            }
        );
        assert!(state.requested_tools().is_empty());
        assert_eq!(
            state.phases(),
            [Phase::SelectingTools, Phase::Reasoning, Phase::Aborted]
        );
    }

    #[tokio::test]
    async fn no_matching_tools_still_answers() {
        let backend = ScriptedBackend::new([ModelReply::text("Try the coast.")]);
        let dispatcher = dispatcher(backend).await.build().unwrap();

        let state = dispatcher.run("suggest a vacation").await.unwrap();

        assert!(state.bound_tools().is_empty());
        assert!(dispatcher.backend.seen()[0].tools.is_empty());
        assert_eq!(state.final_answer(), Some("Try the coast."));
        assert_eq!(
            state.phases(),
            [Phase::SelectingTools, Phase::Reasoning, Phase::Done]
        );
    }

    #[tokio::test]
    async fn any_call_without_bound_tools_violates_protocol() {
        let backend = ScriptedBackend::new([ModelReply::tool_call(
            "c1",
            "get_lat_long",
            json!({"place": "Nice"}),
        )]);
        let dispatcher = dispatcher(backend).await.build().unwrap();

        let state = dispatcher.run("suggest a vacation").await.unwrap();
        assert_eq!(aborted(&state).tag(), "protocol_violation");
    }

    #[tokio::test]
    async fn tool_failure_is_returned_to_model() {
        let backend = ScriptedBackend::new([
            ModelReply::tool_call("c1", "get_booking_details", json!({"booking_id": "999"})),
            ModelReply::text("I could not find booking 999."),
        ]);
        let dispatcher = dispatcher(backend).await.build().unwrap();

        let state = dispatcher
            .run("look up my restaurant booking 999")
            .await
            .unwrap();

        assert_eq!(state.final_answer(), Some("I could not find booking 999."));
        let outputs = results(&state);
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].is_error());
        assert!(
            outputs[0]
                .to_model_text()
                .contains("No booking found with ID: 999")
        );

        // The model saw the failure on its second turn.
        let seen = dispatcher.backend.seen();
        assert!(matches!(
            seen[1].messages.last(),
            Some(Message::ToolResult { output, .. }) if output.is_error()
        ));
    }

    #[tokio::test]
    async fn endless_tool_calls_hit_the_budget() {
        let backend = ScriptedBackend::repeating(ModelReply::tool_call(
            "c",
            "get_lat_long",
            json!({"place": "Seattle"}),
        ));
        let config = DispatcherConfig {
            max_iterations: 3,
            ..DispatcherConfig::default()
        };
        let dispatcher = dispatcher(backend).await.config(config).build().unwrap();

        let state = dispatcher.run("find me the place called Seattle").await.unwrap();

        assert_eq!(aborted(&state), &AbortReason::BudgetExceeded { limit: 3 });
        assert_eq!(state.requested_tools().len(), 3);
        assert_eq!(results(&state).len(), 3);
        assert_eq!(dispatcher.backend.seen().len(), 4);
        let executions = state
            .phases()
            .iter()
            .filter(|p| **p == Phase::AwaitingToolResult)
            .count();
        assert_eq!(executions, 3);
    }

    #[tokio::test]
    async fn text_with_calls_is_kept_before_requests() {
        let mut first = ModelReply::tool_call("c1", "get_lat_long", json!({"place": "Seattle"}));
        first.text = Some("Let me look that up.".into());
        let backend = ScriptedBackend::new([first, ModelReply::text("Found it.")]);
        let dispatcher = dispatcher(backend).await.build().unwrap();

        let state = dispatcher.run("find me the place called Seattle").await.unwrap();

        assert_eq!(state.messages()[1], Message::model("Let me look that up."));
        assert!(matches!(
            state.messages()[2],
            Message::ToolInvocationRequest { .. }
        ));
        assert_eq!(state.final_answer(), Some("Found it."));
    }

    #[tokio::test]
    async fn empty_reply_finishes_with_empty_answer() {
        let backend = ScriptedBackend::new([ModelReply::default()]);
        let dispatcher = dispatcher(backend).await.build().unwrap();

        let state = dispatcher.run("suggest a vacation").await.unwrap();
        assert_eq!(state.final_answer(), Some(""));
        assert_eq!(state.messages().len(), 1);
    }

    #[tokio::test]
    async fn calls_in_one_turn_keep_request_order() {
        for parallel in [false, true] {
            let backend = ScriptedBackend::new([
                ModelReply::tool_call("a", "get_weather", json!({"latitude": 1.0, "longitude": 2.0}))
                    .with_tool_call("b", "get_lat_long", json!({"place": "Oslo"})),
                ModelReply::text("Done."),
            ]);
            let config = DispatcherConfig {
                parallel_tool_calls: parallel,
                ..DispatcherConfig::default()
            };
            let dispatcher = dispatcher(backend).await.config(config).build().unwrap();

            let state = dispatcher.run("find me the weather for Oslo").await.unwrap();

            let ids: Vec<&str> = state
                .messages()
                .iter()
                .filter_map(|m| match m {
                    Message::ToolInvocationRequest { call_id, .. }
                    | Message::ToolResult { call_id, .. } => Some(call_id.as_str()),
                    _ => None,
                })
                .collect();
            assert_eq!(ids, ["a", "b", "a", "b"]);
            assert_eq!(
                state
                    .phases()
                    .iter()
                    .filter(|p| **p == Phase::AwaitingToolResult)
                    .count(),
                1
            );
        }
    }

    #[tokio::test]
    async fn denied_tool_reports_denial_to_model() {
        let backend = ScriptedBackend::new([
            ModelReply::tool_call("c1", "get_lat_long", json!({"place": "Seattle"})),
            ModelReply::text("I am not allowed to look that up."),
        ]);
        let policy = Policy {
            deny: DenyRules {
                tools: vec!["get_lat_long".into()],
            },
            ..Policy::permissive()
        };
        let dispatcher = dispatcher(backend).await.policy(policy).build().unwrap();

        let state = dispatcher.run("find me the place called Seattle").await.unwrap();

        let outputs = results(&state);
        assert!(matches!(
            outputs[0],
            ToolOutcome::Error { error: ToolError::Denied(message) }
                if message.starts_with("API call denied:")
        ));
        assert!(state.outcome().is_some_and(Outcome::is_done));
    }

    #[tokio::test]
    async fn rejected_approval_skips_execution() {
        let backend = ScriptedBackend::new([
            ModelReply::tool_call("c1", "get_lat_long", json!({"place": "Seattle"})),
            ModelReply::text("Okay, I will not."),
        ]);
        let dispatcher = dispatcher(backend)
            .await
            .policy(Policy::restrictive())
            .approvals(Arc::new(RejectAll))
            .build()
            .unwrap();

        let state = dispatcher.run("find me the place called Seattle").await.unwrap();

        assert!(state.phases().contains(&Phase::AwaitingApproval));
        assert!(matches!(
            results(&state)[0],
            ToolOutcome::Error { error: ToolError::Denied(message) }
                if message.starts_with("API call denied by approver:")
        ));
    }

    #[tokio::test]
    async fn approved_call_runs() {
        let backend = ScriptedBackend::new([
            ModelReply::tool_call("c1", "get_lat_long", json!({"place": "Seattle"})),
            ModelReply::text("47.6, -122.3"),
        ]);
        let dispatcher = dispatcher(backend)
            .await
            .policy(Policy::restrictive())
            .build()
            .unwrap();

        let state = dispatcher.run("find me the place called Seattle").await.unwrap();

        assert_eq!(
            &state.phases()[..4],
            [
                Phase::SelectingTools,
                Phase::Reasoning,
                Phase::AwaitingApproval,
                Phase::AwaitingToolResult,
            ]
        );
        assert!(!results(&state)[0].is_error());
    }

    async fn slow_dispatcher(
        backend: ScriptedBackend,
        tool_timeout: Duration,
    ) -> Dispatcher<ScriptedBackend, KeywordEmbedder> {
        let corpus = vec![IndexEntry::new("check the weather", ["slow_tool"]).unwrap()];
        let index = ToolIndex::build(KeywordEmbedder, corpus, DEFAULT_SIMILARITY_FLOOR)
            .await
            .unwrap();
        let config = DispatcherConfig {
            tool_timeout,
            ..DispatcherConfig::default()
        };
        Dispatcher::builder(backend, Arc::new(demo_catalog()), Arc::new(index))
            .config(config)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn slow_tool_times_out() {
        let backend = ScriptedBackend::new([
            ModelReply::tool_call("c1", "slow_tool", json!({})),
            ModelReply::text("The tool timed out."),
        ]);
        let dispatcher = slow_dispatcher(backend, Duration::from_millis(20)).await;

        let state = dispatcher.run("weather please").await.unwrap();

        assert_eq!(
            results(&state)[0],
            &ToolOutcome::Error {
                error: ToolError::Timeout(20)
            }
        );
        assert!(state.outcome().is_some_and(Outcome::is_done));
    }

    #[tokio::test]
    async fn cancel_during_tool_aborts() {
        let backend = ScriptedBackend::new([ModelReply::tool_call("c1", "slow_tool", json!({}))]);
        let dispatcher = slow_dispatcher(backend, Duration::from_secs(30)).await;
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let state = dispatcher
            .run_with_cancel("weather please", &cancel)
            .await
            .unwrap();

        assert_eq!(aborted(&state), &AbortReason::Cancelled);
        assert_eq!(
            results(&state),
            [&ToolOutcome::Error {
                error: ToolError::Cancelled
            }]
        );
    }

    /// Every request the model sees has a result before the next user turn.
    fn assert_settled(messages: &[Message]) {
        for (i, message) in messages.iter().enumerate() {
            if let Message::ToolInvocationRequest { call_id, .. } = message {
                let answered = messages[i + 1..].iter().any(|m| {
                    matches!(m, Message::ToolResult { call_id: id, .. } if id == call_id)
                });
                assert!(answered, "request {call_id} has no result");
            }
        }
    }

    #[tokio::test]
    async fn conversation_continues_after_cancelled_tool() {
        let backend = ScriptedBackend::new([
            ModelReply::tool_call("c1", "slow_tool", json!({})),
            ModelReply::text("Sunny again."),
        ]);
        let dispatcher = slow_dispatcher(backend, Duration::from_secs(30)).await;
        let mut state = ConversationState::new();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        dispatcher
            .run_in(&mut state, "weather please", &cancel)
            .await
            .unwrap();
        assert_eq!(aborted(&state), &AbortReason::Cancelled);

        dispatcher
            .run_in(&mut state, "weather again", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.final_answer(), Some("Sunny again."));

        let seen = dispatcher.backend.seen();
        assert_eq!(seen.len(), 2);
        let context = &seen[1].messages;
        assert_eq!(context.len(), 4);
        assert!(matches!(
            &context[2],
            Message::ToolResult {
                call_id,
                output: ToolOutcome::Error {
                    error: ToolError::Cancelled
                },
                ..
            } if call_id == "c1"
        ));
        assert_eq!(context[3], Message::user("weather again"));
        assert_settled(context);
    }

    /// Never answers.
    struct SilentApprover;

    #[async_trait::async_trait]
    impl ApprovalProvider for SilentApprover {
        async fn review(&self, _request: ApprovalRequest<'_>) -> Approval {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn cancel_during_approval_settles_every_request() {
        let backend = ScriptedBackend::new([
            ModelReply::tool_call("c1", "get_lat_long", json!({"place": "Seattle"}))
                .with_tool_call("c2", "get_weather", json!({"latitude": 1.0, "longitude": 2.0})),
            ModelReply::text("Fine."),
        ]);
        let dispatcher = dispatcher(backend)
            .await
            .policy(Policy::restrictive())
            .approvals(Arc::new(SilentApprover))
            .build()
            .unwrap();
        let mut state = ConversationState::new();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        dispatcher
            .run_in(&mut state, "find me the weather for Seattle", &cancel)
            .await
            .unwrap();

        assert_eq!(aborted(&state), &AbortReason::Cancelled);
        assert!(state.phases().contains(&Phase::AwaitingApproval));
        let cancelled: Vec<&str> = state
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult {
                    call_id,
                    output: ToolOutcome::Error {
                        error: ToolError::Cancelled,
                    },
                    ..
                } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(cancelled, ["c1", "c2"]);
        assert_settled(state.messages());
    }

    #[tokio::test]
    async fn cancelled_before_start_never_calls_model() {
        let backend = ScriptedBackend::new([ModelReply::text("unused")]);
        let dispatcher = dispatcher(backend).await.build().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let state = dispatcher
            .run_with_cancel("find me the weather for Seattle", &cancel)
            .await
            .unwrap();

        assert_eq!(aborted(&state), &AbortReason::Cancelled);
        assert_eq!(state.phases(), [Phase::SelectingTools, Phase::Aborted]);
        assert!(dispatcher.backend.seen().is_empty());
    }

    #[tokio::test]
    async fn embedder_outage_aborts_run() {
        let embedder = SwitchableEmbedder::default();
        let index = ToolIndex::build(embedder.clone(), weather_corpus(), DEFAULT_SIMILARITY_FLOOR)
            .await
            .unwrap();
        let backend = ScriptedBackend::new([ModelReply::text("unused")]);
        let dispatcher = Dispatcher::builder(backend, Arc::new(demo_catalog()), Arc::new(index))
            .build()
            .unwrap();

        embedder.go_down();
        let state = dispatcher.run("find me the weather for Seattle").await.unwrap();

        assert_eq!(aborted(&state).tag(), "index_unavailable");
        assert!(dispatcher.backend.seen().is_empty());
    }

    #[tokio::test]
    async fn model_failure_is_an_error() {
        let backend = ScriptedBackend::default();
        let dispatcher = dispatcher(backend).await.build().unwrap();

        let mut state = ConversationState::new();
        let err = dispatcher
            .run_in(&mut state, "suggest a vacation", &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Model(_)));
        assert_eq!(state.messages(), [Message::user("suggest a vacation")]);
        assert!(state.outcome().is_none());
    }

    #[tokio::test]
    async fn follow_up_request_keeps_history() {
        let backend = ScriptedBackend::new([
            ModelReply::text("Try the coast."),
            ModelReply::tool_call("c1", "get_lat_long", json!({"place": "Nice"})),
            ModelReply::text("Nice is at 43.7, 7.3."),
        ]);
        let dispatcher = dispatcher(backend).await.build().unwrap();
        let cancel = CancellationToken::new();

        let mut state = ConversationState::new();
        dispatcher
            .run_in(&mut state, "suggest a vacation", &cancel)
            .await
            .unwrap();
        assert!(state.bound_tools().is_empty());

        dispatcher
            .run_in(&mut state, "find the place called Nice", &cancel)
            .await
            .unwrap();

        assert_eq!(state.bound_tools(), ["get_lat_long"]);
        assert_eq!(state.final_answer(), Some("Nice is at 43.7, 7.3."));
        assert_eq!(state.phases()[0], Phase::SelectingTools);
        let seen = dispatcher.backend.seen();
        assert_eq!(seen[1].messages.len(), 3);
        assert_eq!(seen[1].messages[0], Message::user("suggest a vacation"));
    }

    #[tokio::test]
    async fn build_rejects_index_with_unknown_tool() {
        let corpus = vec![IndexEntry::new("stock prices", ["get_stock_price"]).unwrap()];
        let index = ToolIndex::build(KeywordEmbedder, corpus, DEFAULT_SIMILARITY_FLOOR)
            .await
            .unwrap();
        let result = Dispatcher::builder(
            ScriptedBackend::default(),
            Arc::new(demo_catalog()),
            Arc::new(index),
        )
        .build();

        assert!(matches!(result, Err(Error::UnknownTool(id)) if id == "get_stock_price"));
    }

    #[tokio::test]
    async fn build_rejects_zero_budget() {
        let config = DispatcherConfig {
            max_iterations: 0,
            ..DispatcherConfig::default()
        };
        let result = dispatcher(ScriptedBackend::default())
            .await
            .config(config)
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
