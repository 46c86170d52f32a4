//! The onboarding loop controller.
//!
//! One turn: derive the step from the store, call the model, execute any
//! fenced tool calls in order, feed results back, repeat. Stops when the
//! model answers without calls (and the guard accepts it), when a step's
//! terminal mutation succeeds, or when the iteration cap is hit.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::guard::{ClaimRules, GuardVerdict, HallucinationGuard};
use super::model::{Boat, Flow, Journey, Profile};
use super::normalize::decode_nested;
use super::parser::parse_tool_calls;
use super::prompts::{
    PromptContext, approved_action_message, build_prompt, terminal_success_message,
    tool_results_message,
};
use super::state::{OnboardingStep, StepFacts, allowed_tool_names, derive_step};
use super::types::{
    AssistantMessage, EntityFlags, MessageMetadata, ToolCall, ToolResult, TurnRequest,
    TurnResponse,
};
use crate::config::OnboardingConfig;
use crate::error::Result;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider, Role};
use crate::onboarding::executor::ToolExecutor;
use crate::store::Database;
use crate::tools::{ToolCategory, ToolContext, ToolError, ToolRegistry};

/// Feedback entry for tool_call blocks that could not be decoded alongside
/// ones that could.
fn dropped_blocks_result(count: usize) -> ToolResult {
    let error = ToolError::ParseFailure(format!(
        "{count} tool_call block(s) were not valid JSON and were skipped; resend them"
    ));
    tracing::info!(kind = error.kind(), count, "Undecodable tool_call blocks");
    ToolResult::err(&ToolCall::new("tool_call", serde_json::Value::Null), error.to_string())
}

/// Collapse text into a single-line preview for logs.
fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match collapsed.char_indices().nth(max_chars) {
        Some((i, _)) => format!("{}...", &collapsed[..i]),
        None => collapsed,
    }
}

/// Shared collaborators.
#[derive(Clone)]
pub struct AgentDeps {
    pub db: Arc<dyn Database>,
    pub llm: Arc<dyn LlmProvider>,
    pub tools: Arc<ToolRegistry>,
}

/// What the store says about the acting identity right now.
#[derive(Debug, Default)]
struct Snapshot {
    profile: Option<Profile>,
    boats: Vec<Boat>,
    journeys: Vec<Journey>,
    facts: StepFacts,
}

/// Runs onboarding turns for one flow.
pub struct OnboardingAgent {
    flow: Flow,
    config: OnboardingConfig,
    deps: AgentDeps,
    executor: ToolExecutor,
    rules: ClaimRules,
}

impl OnboardingAgent {
    pub fn new(flow: Flow, config: OnboardingConfig, deps: AgentDeps) -> Self {
        let executor = ToolExecutor::new(deps.tools.clone());
        Self {
            flow,
            config,
            deps,
            executor,
            rules: ClaimRules::default_rules(),
        }
    }

    /// Replace the hallucination-guard rule set.
    pub fn with_claim_rules(mut self, rules: ClaimRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn flow(&self) -> Flow {
        self.flow
    }

    /// Current step and entity flags for `identity_id`, without a model call.
    pub async fn status(
        &self,
        identity_id: Option<&str>,
    ) -> Result<(OnboardingStep, EntityFlags)> {
        let snapshot = self.load_snapshot(identity_id).await?;
        Ok((
            derive_step(self.flow, snapshot.facts),
            EntityFlags::from_facts(snapshot.facts),
        ))
    }

    /// Process one user turn end to end.
    ///
    /// Tool failures never surface here; they are fed back to the model.
    /// Only infrastructure failures (store reads, model transport) return
    /// `Err`.
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        let session_id = request.session_id.unwrap_or_else(Uuid::new_v4);
        let identity = request
            .identity_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let ctx = ToolContext::new(identity.clone(), self.flow, self.deps.db.clone());

        tracing::info!(
            flow = %self.flow,
            session = %session_id,
            signed_in = identity.is_some(),
            "Onboarding turn started"
        );
        self.persist(session_id, identity.as_deref(), Role::User, &request.message)
            .await;

        let mut snapshot = self.load_snapshot(identity.as_deref()).await?;
        let mut step = derive_step(self.flow, snapshot.facts);
        let mut turn = TurnState::default();

        if let Some(action) = request.approved_action.clone() {
            let call = ToolCall::new(action.tool_name, decode_nested(&action.arguments));
            tracing::info!(tool = %call.name, step = %step, "Executing approved action");
            let result = self
                .executor
                .execute(&call, allowed_tool_names(self.flow, step), &ctx)
                .await;
            let content = approved_action_message(&result);
            if self.is_mutation(&call.name) && result.is_success() {
                turn.mark_created(&result);
                snapshot = self.load_snapshot(identity.as_deref()).await?;
                step = derive_step(self.flow, snapshot.facts);
            }
            turn.record(call, result);
            return Ok(self
                .finish(session_id, identity.as_deref(), content, turn, &snapshot, step, false)
                .await);
        }

        let mut transcript = self.hydrate(&request, session_id).await;
        transcript.push(ChatMessage::user(request.message.clone()));

        let mut guard = HallucinationGuard::new(
            &self.rules,
            self.config.nudge_cap,
            self.config.malformed_retry_cap,
        );
        let mut executed: HashSet<String> = HashSet::new();
        let mut final_content = String::new();
        let mut exhausted = true;
        let max_iterations = self.config.max_iterations(self.flow);

        for iteration in 1..=max_iterations {
            let tools = self.deps.tools.tools_for_step(self.flow, step);
            let system_prompt = build_prompt(
                self.flow,
                step,
                &PromptContext {
                    today: Utc::now().date_naive(),
                    identity_present: identity.is_some(),
                    profile: snapshot.profile.as_ref(),
                    boats: &snapshot.boats,
                    journeys: &snapshot.journeys,
                    tools: &tools,
                    stored_context: &request.stored_context,
                },
            );
            if self.config.log_prompts {
                tracing::debug!(iteration, step = %step, prompt = %system_prompt, "System prompt");
            }

            let completion = CompletionRequest::new(system_prompt, transcript.clone())
                .with_max_tokens(self.config.max_tokens)
                .with_temperature(self.config.temperature);
            let response = self.deps.llm.complete(completion).await?;
            let parsed = parse_tool_calls(&response.content);
            tracing::debug!(
                iteration,
                step = %step,
                calls = parsed.tool_calls.len(),
                dropped = parsed.dropped_blocks,
                "Model responded: {}",
                preview(&response.content, 120)
            );
            transcript.push(ChatMessage::assistant(response.content.clone()));

            if parsed.has_calls() {
                let mut results = Vec::with_capacity(parsed.tool_calls.len());
                let mut terminal: Option<String> = None;

                for call in parsed.tool_calls {
                    let allowed = allowed_tool_names(self.flow, step);
                    let result = self.executor.execute(&call, allowed, &ctx).await;

                    if result.is_success() {
                        executed.insert(call.name.clone());
                        if self.is_mutation(&call.name) {
                            turn.mark_created(&result);
                            let previous = step;
                            snapshot = self.load_snapshot(identity.as_deref()).await?;
                            step = derive_step(self.flow, snapshot.facts);
                            if step != previous {
                                tracing::info!(from = %previous, to = %step, "Step advanced");
                                if previous.terminal_tool(self.flow) == Some(call.name.as_str()) {
                                    terminal = Some(call.name.clone());
                                }
                            }
                        }
                    }
                    results.push(result.clone());
                    turn.record(call, result);
                }
                if parsed.dropped_blocks > 0 {
                    results.push(dropped_blocks_result(parsed.dropped_blocks));
                }

                if self.config.short_circuit_on_terminal
                    && let Some(tool) = terminal
                {
                    tracing::info!(tool = %tool, iteration, "Terminal mutation succeeded, ending turn");
                    final_content = terminal_success_message(self.flow, &tool, step);
                    exhausted = false;
                    break;
                }

                if !parsed.content.is_empty() {
                    final_content = parsed.content;
                }
                transcript.push(ChatMessage::user(tool_results_message(&results)));
                continue;
            }

            let allowed = allowed_tool_names(self.flow, step);
            match guard.inspect(&response.content, parsed.dropped_blocks, allowed, &executed) {
                GuardVerdict::Accept => {
                    final_content = parsed.content;
                    exhausted = false;
                    break;
                }
                verdict => {
                    if let Some(message) = verdict.message() {
                        turn.metadata.synthetic_messages.push(message.to_string());
                        transcript.push(ChatMessage::user(message));
                    }
                }
            }
        }

        if exhausted {
            tracing::warn!(
                flow = %self.flow,
                max_iterations,
                has_content = !final_content.is_empty(),
                "Iteration cap reached"
            );
        }

        Ok(self
            .finish(
                session_id,
                identity.as_deref(),
                final_content,
                turn,
                &snapshot,
                step,
                exhausted,
            )
            .await)
    }

    fn is_mutation(&self, tool: &str) -> bool {
        self.deps
            .tools
            .get(tool)
            .is_some_and(|t| t.category() == ToolCategory::Mutate)
    }

    async fn load_snapshot(&self, identity_id: Option<&str>) -> Result<Snapshot> {
        let Some(user_id) = identity_id else {
            return Ok(Snapshot::default());
        };
        let profile = self.deps.db.get_profile_by_user(user_id).await?;
        let boats = self.deps.db.list_boats_by_owner(user_id).await?;
        let journeys = self.deps.db.list_journeys_by_owner(user_id).await?;
        let role = self.flow.default_role();
        let facts = StepFacts {
            identity_present: true,
            has_profile: profile.as_ref().is_some_and(|p| p.has_role(role)),
            has_boat: !boats.is_empty(),
            has_journey: !journeys.is_empty(),
        };
        Ok(Snapshot {
            profile,
            boats,
            journeys,
            facts,
        })
    }

    /// Prior messages: the client's history, or the stored log when the
    /// client sent none.
    async fn hydrate(&self, request: &TurnRequest, session_id: Uuid) -> Vec<ChatMessage> {
        if !request.conversation_history.is_empty() {
            return request
                .conversation_history
                .iter()
                .filter(|m| m.role != Role::System)
                .map(ChatMessage::from)
                .collect();
        }
        if request.session_id.is_none() {
            return Vec::new();
        }
        match self.deps.db.list_conversation_messages(session_id).await {
            Ok(messages) => {
                let mut history: Vec<ChatMessage> = messages
                    .into_iter()
                    .filter_map(|m| match m.role.as_str() {
                        "user" => Some(ChatMessage::user(m.content)),
                        "assistant" => Some(ChatMessage::assistant(m.content)),
                        _ => None,
                    })
                    .collect();
                // The current message was persisted before hydration.
                if history
                    .last()
                    .is_some_and(|m| m.role == Role::User && m.content == request.message)
                {
                    history.pop();
                }
                history
            }
            Err(e) => {
                tracing::warn!(session = %session_id, "Failed to load conversation: {}", e);
                Vec::new()
            }
        }
    }

    /// Best-effort conversation log write.
    async fn persist(&self, session_id: Uuid, user_id: Option<&str>, role: Role, content: &str) {
        if content.trim().is_empty() {
            return;
        }
        let flow = self.flow.to_string();
        if let Err(e) = self
            .deps
            .db
            .ensure_conversation(session_id, &flow, user_id)
            .await
        {
            tracing::warn!(session = %session_id, "Failed to ensure conversation: {}", e);
            return;
        }
        if let Err(e) = self
            .deps
            .db
            .add_conversation_message(session_id, &role.to_string(), content)
            .await
        {
            tracing::warn!(session = %session_id, "Failed to persist message: {}", e);
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        session_id: Uuid,
        user_id: Option<&str>,
        content: String,
        turn: TurnState,
        snapshot: &Snapshot,
        step: OnboardingStep,
        exhausted: bool,
    ) -> TurnResponse {
        self.persist(session_id, user_id, Role::Assistant, &content)
            .await;

        let mut entities = EntityFlags::from_facts(snapshot.facts);
        entities.profile_created = turn.created.profile_created;
        entities.boat_created = turn.created.boat_created;
        entities.journey_created = turn.created.journey_created;

        tracing::info!(
            flow = %self.flow,
            session = %session_id,
            step = %step,
            tool_calls = turn.metadata.tool_calls.len(),
            exhausted,
            "Onboarding turn finished"
        );

        TurnResponse {
            session_id,
            message: AssistantMessage {
                role: Role::Assistant,
                content,
                timestamp: Utc::now(),
                metadata: (!turn.metadata.is_empty()).then_some(turn.metadata),
            },
            entities,
            step,
            exhausted,
        }
    }
}

/// Mutable bookkeeping for one turn.
#[derive(Debug, Default)]
struct TurnState {
    metadata: MessageMetadata,
    created: EntityFlags,
}

impl TurnState {
    fn record(&mut self, call: ToolCall, result: ToolResult) {
        self.metadata.tool_calls.push(call);
        self.metadata.tool_results.push(result);
    }

    /// Flag entities a successful create actually inserted.
    fn mark_created(&mut self, result: &ToolResult) {
        let inserted = result
            .result
            .as_ref()
            .is_some_and(|r| r.get("already_exists") != Some(&serde_json::Value::Bool(true)));
        if !inserted {
            return;
        }
        match result.name.as_str() {
            "create_profile" => self.created.profile_created = true,
            "create_boat" => self.created.boat_created = true,
            "create_journey" => self.created.journey_created = true,
            _ => {}
        }
    }
}
