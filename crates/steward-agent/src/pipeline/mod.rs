//! Conversation pipeline — one governed turn end to end:
//! guard (pending approvals, cancel) → intent → context assembly → LLM tool
//! loop with policy gate, outbox dedup and DLQ accounting → reply with
//! self-assessment → persistence.
//!
//! Concurrency: one active turn per user × channel; additional messages
//! queue FIFO behind the per-session lock. Cross-channel turns run in
//! parallel.

pub mod confirm;

use std::sync::Arc;

use chrono_tz::Tz;
use dashmap::DashMap;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use steward_core::types::{ChannelTag, TraceId};
use steward_memory::brain::Brain;
use steward_memory::thalamus::ContextThalamus;
use steward_memory::types::ConversationTurn;
use steward_memory::working::{PendingAction, WorkingMemory};
use steward_nervous::policy::RiskLevel;
use steward_nervous::{AgentState, AgentStateMachine, DeadLetterQueue, Outbox, PolicyGate};

use crate::assess::SelfAssessor;
use crate::circadian;
use crate::error::{AgentError, Result};
use crate::intent::{self, ESCALATION_THRESHOLD};
use crate::provider::ChatRequest;
use crate::router::{ModelRouter, ModelTier};
use crate::tone;
use crate::tools::ToolRegistry;

/// Progress callback: short status lines pushed to the transport while a
/// long turn runs.
pub type ProgressFn = Arc<dyn Fn(&str) + Send + Sync>;

/// Core behavioral principles injected into every system prompt, budgeted
/// by the thalamus.
const PRINCIPLES: &str = "\
CORE PRINCIPLES:\n\
1. Interpret intent. The user gives goals, not scripts; act on the meaning, not the literal words.\n\
2. Compose as yourself. When drafting posts or emails you write in first person, naturally.\n\
3. Act proactively. Infer what would help from context instead of waiting for explicit commands.\n\
4. Confirm smartly. High-stakes actions get a draft and a question first; low-stakes actions just happen.\n\
5. Use context. Short replies like 'yes' or 'the same one' refer to the most recent exchange.\n\
6. Executive discretion. Never reveal the principal's schedule details, contacts, or personal info to outsiders.";

pub struct ConversationManager {
    router: Arc<ModelRouter>,
    brain: Arc<Brain>,
    working: Arc<WorkingMemory>,
    thalamus: Arc<ContextThalamus>,
    gate: Arc<PolicyGate>,
    outbox: Arc<Outbox>,
    dlq: Arc<DeadLetterQueue>,
    state: Arc<AgentStateMachine>,
    registry: Arc<ToolRegistry>,
    /// FIFO serialization per user × channel.
    turn_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    max_tool_steps: usize,
    tz: Tz,
}

impl ConversationManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        router: Arc<ModelRouter>,
        brain: Arc<Brain>,
        working: Arc<WorkingMemory>,
        thalamus: Arc<ContextThalamus>,
        gate: Arc<PolicyGate>,
        outbox: Arc<Outbox>,
        dlq: Arc<DeadLetterQueue>,
        state: Arc<AgentStateMachine>,
        registry: Arc<ToolRegistry>,
        max_tool_steps: usize,
        tz: Tz,
    ) -> Self {
        Self {
            router,
            brain,
            working,
            thalamus,
            gate,
            outbox,
            dlq,
            state,
            registry,
            turn_locks: DashMap::new(),
            max_tool_steps,
            tz,
        }
    }

    pub fn state_machine(&self) -> &AgentStateMachine {
        &self.state
    }

    /// Single entry point for one inbound message. Never panics and never
    /// surfaces raw errors: failures come back as a short apology.
    pub async fn process_message(
        &self,
        message: &str,
        channel: ChannelTag,
        user_id: &str,
        progress: Option<ProgressFn>,
    ) -> String {
        if message.trim().is_empty() {
            return String::new();
        }

        let lock = self
            .turn_locks
            .entry(format!("{user_id}:{channel}"))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        match self.run_turn(message, channel, user_id, progress).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, channel = %channel, "turn failed");
                self.state.reset();
                format!("Sorry, something went wrong: {}.", e.sanitized())
            }
        }
    }

    async fn run_turn(
        &self,
        message: &str,
        channel: ChannelTag,
        user_id: &str,
        progress: Option<ProgressFn>,
    ) -> Result<String> {
        let trace = TraceId::new();
        self.gate.reset_run_counts();

        // 1. Guard: pending-approval confirmations and the cancel latch come
        //    before any model call.
        let has_pending = !self.working.pending_actions().is_empty();
        if (self.state.state() == AgentState::AwaitingApproval || has_pending)
            && confirm::is_affirmative(message)
        {
            let reply = match self.working.pop_pending_action(None) {
                Some(action) => self.execute_approved(&action, &trace).await,
                None => "That proposal has expired; tell me again what you'd like to do.".into(),
            };
            self.persist_turn(user_id, channel, message, &reply, "confirmation", &[])
                .await;
            self.state.reset();
            return Ok(reply);
        }
        if self.state.state() == AgentState::AwaitingApproval && confirm::is_negative(message) {
            self.working.clear_pending_actions();
            self.state.reset();
            let reply = "Okay, I won't do that.".to_string();
            self.persist_turn(user_id, channel, message, &reply, "confirmation", &[])
                .await;
            return Ok(reply);
        }
        if confirm::is_cancel(message) {
            self.state.request_cancel();
            self.state.reset();
            return Ok("Cancelled.".to_string());
        }

        // 2. Intent classification; low confidence escalates to the big model.
        self.state.transition(AgentState::ParsingIntent, message);
        let mut intent = intent::classify(&self.router, message, ModelTier::Intent).await;
        if intent.confidence < ESCALATION_THRESHOLD {
            debug!(
                action = %intent.action,
                confidence = intent.confidence,
                "low intent confidence, escalating"
            );
            intent = intent::classify(&self.router, message, ModelTier::Default).await;
        }
        info!(trace = %trace, action = %intent.action, confidence = intent.confidence, "intent");

        // 3. Context assembly under thalamus budgets.
        self.state.transition(AgentState::Thinking, "");
        let system = self.build_system_prompt(message, channel).await;

        // 4. LLM tool loop.
        let history = self.thalamus.history(user_id);
        let mut raw_messages: Vec<Value> = history
            .iter()
            .map(|m| json!({"role": m.role, "content": m.content}))
            .collect();
        raw_messages.push(json!({"role": "user", "content": message}));

        let tool_defs = self.registry.definitions(None);
        let mut tools_used: Vec<String> = Vec::new();
        let mut model_used = self.router.model_for(ModelTier::Default);
        let mut final_text: Option<String> = None;

        for step in 0..self.max_tool_steps {
            let req = ChatRequest {
                model: String::new(),
                system: system.clone(),
                messages: Vec::new(),
                max_tokens: 4096,
                tools: tool_defs.clone(),
                raw_messages: Some(raw_messages.clone()),
            };
            let response = self.router.send(ModelTier::Default, req).await?;
            model_used = response.model.clone();

            if response.tool_calls.is_empty() || response.stop_reason != "tool_use" {
                final_text = Some(response.content);
                break;
            }

            // Assistant turn with its tool_use blocks.
            let mut assistant_content: Vec<Value> = Vec::new();
            if !response.content.is_empty() {
                assistant_content.push(json!({"type": "text", "text": response.content}));
            }
            for call in &response.tool_calls {
                assistant_content.push(json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.input,
                }));
            }
            raw_messages.push(json!({"role": "assistant", "content": assistant_content}));

            // Execute each call through the gate.
            self.state.transition(AgentState::Executing, "");
            let mut tool_results: Vec<Value> = Vec::new();
            for call in &response.tool_calls {
                if self.state.is_cancelled() {
                    return Err(AgentError::Cancelled);
                }

                let operation = extract_operation(&call.input);
                let decision = self.gate.check(
                    &call.name,
                    operation.as_deref(),
                    Some(&call.input),
                    trace.as_str(),
                    false,
                );

                if !decision.allowed {
                    tool_results.push(tool_result_block(&call.id, &format!("ERROR: {}", decision.reason), true));
                    continue;
                }

                if decision.risk == RiskLevel::Irreversible {
                    // Draft, don't do: stash the proposal and ask the user.
                    let reply =
                        self.stash_proposal(call.name.as_str(), operation.as_deref(), &call.input, &response.content);
                    self.persist_turn(user_id, channel, message, &reply, &model_used, &tools_used)
                        .await;
                    return Ok(reply);
                }

                if let Some(ref cb) = progress {
                    cb(&format!("running {}", call.name));
                }

                let outcome = self.registry.invoke(&call.name, call.input.clone()).await;
                let dlq_key = format!("tool:{}:{}", call.name, operation.as_deref().unwrap_or("-"));
                if outcome.success {
                    self.dlq.record_success(&dlq_key);
                } else {
                    self.dlq.record_failure(
                        &dlq_key,
                        outcome.error.as_deref().unwrap_or("unknown"),
                        json!({"tool": call.name, "trace": trace.as_str()}),
                    );
                }
                tools_used.push(call.name.clone());
                tool_results.push(tool_result_block(&call.id, &outcome.llm_payload(), !outcome.success));
            }
            raw_messages.push(json!({"role": "user", "content": tool_results}));

            debug!(trace = %trace, step, "tool loop step complete");
        }

        let mut reply = final_text.unwrap_or_else(|| {
            "I hit the tool-step limit for one turn; here's where I got to so far.".to_string()
        });

        // 5. Self-assessment; only low confidence surfaces a suffix.
        self.state.transition(AgentState::Reflecting, "");
        if let Some(assessment) = SelfAssessor::assess(&self.router, message, &reply).await {
            reply.push_str(&SelfAssessor::format_suffix(&assessment));
        }

        // 6. Persist and reset.
        self.state.transition(AgentState::Responding, "");
        self.persist_turn(user_id, channel, message, &reply, &model_used, &tools_used)
            .await;
        self.state.reset();

        Ok(reply)
    }

    /// Stash an irreversible proposal and produce the confirmation prompt.
    fn stash_proposal(
        &self,
        tool: &str,
        operation: Option<&str>,
        params: &Value,
        draft_text: &str,
    ) -> String {
        let label = match operation {
            Some(op) => format!("{tool}.{op}"),
            None => tool.to_string(),
        };
        let draft = describe_params(params);
        let proposal = if draft_text.is_empty() {
            format!("I'm ready to run {label} with: {draft}. Should I go ahead?")
        } else {
            format!("{draft_text}\n\nI'd run {label} with: {draft}. Should I go ahead?")
        };
        self.working
            .add_pending_action(tool, params.clone(), &label, &proposal);
        self.state.transition(AgentState::AwaitingApproval, &label);
        proposal
    }

    /// Execute a user-confirmed pending action through the outbox.
    async fn execute_approved(&self, action: &PendingAction, trace: &TraceId) -> String {
        self.state.transition(AgentState::Executing, &action.label);

        let operation = extract_operation(&action.parameters);
        let decision = self.gate.check(
            &action.tool_name,
            operation.as_deref(),
            Some(&action.parameters),
            trace.as_str(),
            true,
        );
        if !decision.allowed {
            return format!("I can't do that: {}.", decision.reason);
        }

        let op = operation.as_deref().unwrap_or("");
        let key = Outbox::idempotency_key(&action.tool_name, op, &action.parameters);
        if self.outbox.is_duplicate(&key) {
            debug!(key = %key, "duplicate irreversible action short-circuited");
            return match self.outbox.stored_result(&key) {
                Some(result) => format!("Already done earlier: {result}"),
                None => "Already done earlier.".to_string(),
            };
        }

        self.outbox
            .record_pending(&key, &action.tool_name, op, &action.parameters);

        let outcome = self
            .registry
            .invoke(&action.tool_name, action.parameters.clone())
            .await;

        if outcome.success {
            let output = outcome.output.clone().unwrap_or_default();
            self.outbox.mark_sent(&key, Some(&output));
            self.dlq.record_success(&key);
            info!(trace = %trace, tool = %action.tool_name, "approved action executed");
            format!("Done. {output}")
        } else {
            let err = outcome.error.clone().unwrap_or_else(|| "unknown".into());
            self.outbox.mark_failed(&key, &err);
            self.dlq.record_failure(
                &key,
                &err,
                json!({"tool": action.tool_name, "label": action.label}),
            );
            format!("That didn't work: {err}")
        }
    }

    /// Least-privilege step execution for the task runner: only the hinted
    /// tools are exposed, irreversible calls go through the outbox (the
    /// runner has already warned the user and waited out the grace window).
    pub async fn run_task_step(
        &self,
        prompt: &str,
        allowed_tools: &[String],
        tier: ModelTier,
    ) -> std::result::Result<String, String> {
        let trace = TraceId::new();
        self.gate.reset_run_counts();

        let tool_defs = self.registry.definitions(Some(allowed_tools));
        let mut raw_messages = vec![json!({"role": "user", "content": prompt})];

        for _ in 0..self.max_tool_steps {
            let req = ChatRequest {
                model: String::new(),
                system: format!(
                    "You are an autonomous background worker for the principal's assistant. \
                     Complete the step you are given and report the result.\n\n{}",
                    steward_core::timezone::time_context(self.tz)
                ),
                messages: Vec::new(),
                max_tokens: 4096,
                tools: tool_defs.clone(),
                raw_messages: Some(raw_messages.clone()),
            };
            let response = self
                .router
                .send(tier, req)
                .await
                .map_err(|e| e.to_string())?;

            if response.tool_calls.is_empty() || response.stop_reason != "tool_use" {
                return Ok(response.content);
            }

            let mut assistant_content: Vec<Value> = Vec::new();
            if !response.content.is_empty() {
                assistant_content.push(json!({"type": "text", "text": response.content}));
            }
            for call in &response.tool_calls {
                assistant_content.push(json!({
                    "type": "tool_use", "id": call.id, "name": call.name, "input": call.input,
                }));
            }
            raw_messages.push(json!({"role": "assistant", "content": assistant_content}));

            let mut tool_results: Vec<Value> = Vec::new();
            for call in &response.tool_calls {
                let operation = extract_operation(&call.input);
                let decision = self.gate.check(
                    &call.name,
                    operation.as_deref(),
                    Some(&call.input),
                    trace.as_str(),
                    true,
                );
                if !decision.allowed {
                    tool_results.push(tool_result_block(&call.id, &format!("ERROR: {}", decision.reason), true));
                    continue;
                }

                let payload = if decision.risk == RiskLevel::Irreversible {
                    let op = operation.as_deref().unwrap_or("");
                    let key = Outbox::idempotency_key(&call.name, op, &call.input);
                    if self.outbox.is_duplicate(&key) {
                        debug!(key = %key, "duplicate side-effect in task step skipped");
                        "already sent earlier (duplicate suppressed)".to_string()
                    } else {
                        self.outbox.record_pending(&key, &call.name, op, &call.input);
                        let outcome = self.registry.invoke(&call.name, call.input.clone()).await;
                        if outcome.success {
                            self.outbox.mark_sent(&key, outcome.output.as_deref());
                        } else {
                            self.outbox
                                .mark_failed(&key, outcome.error.as_deref().unwrap_or("unknown"));
                        }
                        outcome.llm_payload()
                    }
                } else {
                    self.registry.invoke(&call.name, call.input.clone()).await.llm_payload()
                };
                tool_results.push(tool_result_block(&call.id, &payload, payload.starts_with("ERROR:")));
            }
            raw_messages.push(json!({"role": "user", "content": tool_results}));
        }

        Err("step exceeded the tool-loop limit".to_string())
    }

    async fn build_system_prompt(&self, message: &str, channel: ChannelTag) -> String {
        let brain_ctx = self
            .thalamus
            .budget_brain_context(&self.brain.get_relevant_context(message, Some(channel), 5).await);
        let principles = self.thalamus.budget_principles(PRINCIPLES);

        let mut sections = vec![
            "You are the principal's personal executive assistant. Intelligent, warm, direct. \
             You act through tools; never pretend an action happened without calling one."
                .to_string(),
            steward_core::timezone::time_context(self.tz),
            principles,
        ];
        for extra in [
            circadian::context(self.tz),
            self.working.get_context(),
            self.working.preference_summary(),
            brain_ctx,
        ] {
            if !extra.is_empty() {
                sections.push(extra);
            }
        }
        sections.join("\n\n")
    }

    async fn persist_turn(
        &self,
        user_id: &str,
        channel: ChannelTag,
        user_msg: &str,
        reply: &str,
        model_id: &str,
        tools_used: &[String],
    ) {
        if reply.is_empty() {
            return;
        }
        let turn = ConversationTurn {
            user_msg: user_msg.to_string(),
            assistant_msg: reply.to_string(),
            channel,
            timestamp: chrono::Utc::now().to_rfc3339(),
            model_id: model_id.to_string(),
            tool_invocations: tools_used.to_vec(),
        };
        if let Err(e) = self.brain.store_turn(&turn).await {
            warn!(error = %e, "failed to persist turn");
        }
        self.thalamus.manage_history(user_id, user_msg, reply);
        let signal = tone::analyze(user_msg);
        self.working.update_after_turn(signal.register);
    }
}

fn extract_operation(input: &Value) -> Option<String> {
    input
        .get("action")
        .or_else(|| input.get("operation"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn tool_result_block(id: &str, content: &str, is_error: bool) -> Value {
    json!({
        "type": "tool_result",
        "tool_use_id": id,
        "content": content,
        "is_error": is_error,
    })
}

/// Compact human-readable rendering of tool params for proposals.
fn describe_params(params: &Value) -> String {
    match params {
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}=\"{}\"", truncate(s, 200)),
                other => format!("{k}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderError;
    use crate::router::test_support::ScriptedProvider;
    use crate::router::TierModels;
    use crate::tools::test_support::CountingTool;
    use std::sync::Arc;

    struct Fixture {
        manager: ConversationManager,
        provider: Arc<ScriptedProvider>,
        clock: Arc<CountingTool>,
        x_tool: Arc<CountingTool>,
        _dir: tempfile::TempDir,
    }

    async fn fixture(responses: Vec<std::result::Result<crate::provider::ChatResponse, ProviderError>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let brain = Arc::new(
            Brain::open(
                dir.path(),
                Arc::new(steward_memory::embed::HashEmbedder::default()),
            )
            .await
            .unwrap(),
        );
        let working = Arc::new(WorkingMemory::load(dir.path().join("working_memory.json")));
        let thalamus = Arc::new(ContextThalamus::new());
        let gate = Arc::new(PolicyGate::new(false));
        let outbox = Arc::new(Outbox::load(dir.path().join("outbox.json")));
        let dlq = Arc::new(DeadLetterQueue::load(dir.path().join("dlq.json")));
        let state = Arc::new(AgentStateMachine::new());

        let clock = Arc::new(CountingTool::new("clock", "2026-08-01 12:00"));
        let x_tool = Arc::new(CountingTool::new("x_tool", "https://x.com/status/1"));
        let mut registry = ToolRegistry::new();
        registry.register(clock.clone());
        registry.register(x_tool.clone());

        let models = TierModels {
            default: "big".into(),
            subagent: "mid".into(),
            chat: "small".into(),
            intent: "small".into(),
        };
        let provider = Arc::new(ScriptedProvider::new("scripted", responses));
        let router = Arc::new(ModelRouter::new(models, provider.clone(), None));

        let manager = ConversationManager::new(
            router,
            brain,
            working,
            thalamus,
            gate,
            outbox,
            dlq,
            state,
            Arc::new(registry),
            8,
            chrono_tz::UTC,
        );

        Fixture {
            manager,
            provider,
            clock,
            x_tool,
            _dir: dir,
        }
    }

    fn intent_json(action: &str, confidence: f64) -> crate::provider::ChatResponse {
        ScriptedProvider::text_response(&format!(
            "{{\"action\": \"{action}\", \"confidence\": {confidence}}}"
        ))
    }

    #[tokio::test]
    async fn empty_message_produces_no_reply_and_no_state() {
        let f = fixture(vec![]).await;
        let reply = f
            .manager
            .process_message("   ", ChannelTag::Telegram, "u1", None)
            .await;
        assert_eq!(reply, "");
        assert!(f.manager.thalamus.history("u1").is_empty());
    }

    #[tokio::test]
    async fn read_tool_flow_persists_turn() {
        let f = fixture(vec![
            Ok(intent_json("read_calendar", 0.9)),
            Ok(ScriptedProvider::tool_response("clock", json!({}))),
            Ok(ScriptedProvider::text_response("It's noon.")),
        ])
        .await;

        let reply = f
            .manager
            .process_message("what time is it?", ChannelTag::Telegram, "u1", None)
            .await;
        assert_eq!(reply, "It's noon.");
        assert_eq!(f.clock.call_count(), 1);

        let hits = f
            .manager
            .brain
            .search_channel(ChannelTag::Telegram, "what time is it", 5)
            .await;
        assert_eq!(hits.len(), 1);
        assert!(hits[0].text.contains("It's noon."));
    }

    #[tokio::test]
    async fn irreversible_flow_requires_confirmation_and_dedups() {
        let f = fixture(vec![
            // turn 1: intent, then the model proposes the post
            Ok(intent_json("post_social", 0.95)),
            Ok(ScriptedProvider::tool_response(
                "x_tool",
                json!({"action": "post_tweet", "text": "hiring is brutal"}),
            )),
        ])
        .await;

        let reply = f
            .manager
            .process_message("post on x: hiring is brutal", ChannelTag::Telegram, "u1", None)
            .await;
        assert!(reply.contains("Should I go ahead?"));
        assert_eq!(f.x_tool.call_count(), 0, "no post before confirmation");
        assert_eq!(f.manager.state.state(), AgentState::AwaitingApproval);
        assert_eq!(f.manager.working.pending_actions().len(), 1);

        // turn 2: user confirms; the tool runs exactly once.
        let reply = f
            .manager
            .process_message("yes do it", ChannelTag::Telegram, "u1", None)
            .await;
        assert!(reply.contains("https://x.com/status/1"));
        assert_eq!(f.x_tool.call_count(), 1);
        assert!(f.manager.working.pending_actions().is_empty());

        // Same proposal stashed again; confirmation hits the outbox and the
        // tool is NOT executed a second time.
        f.manager.working.add_pending_action(
            "x_tool",
            json!({"action": "post_tweet", "text": "hiring is brutal"}),
            "x_tool.post_tweet",
            "repeat",
        );
        let reply = f
            .manager
            .process_message("yes", ChannelTag::Telegram, "u1", None)
            .await;
        assert!(reply.contains("Already done"));
        assert_eq!(f.x_tool.call_count(), 1, "outbox must suppress the duplicate");
    }

    #[tokio::test]
    async fn negative_response_clears_pending() {
        let f = fixture(vec![
            Ok(intent_json("post_social", 0.95)),
            Ok(ScriptedProvider::tool_response(
                "x_tool",
                json!({"action": "post_tweet", "text": "draft"}),
            )),
        ])
        .await;

        f.manager
            .process_message("post about the launch", ChannelTag::Telegram, "u1", None)
            .await;
        assert_eq!(f.manager.working.pending_actions().len(), 1);

        let reply = f
            .manager
            .process_message("no, hold off", ChannelTag::Telegram, "u1", None)
            .await;
        assert!(reply.contains("won't"));
        assert!(f.manager.working.pending_actions().is_empty());
        assert_eq!(f.x_tool.call_count(), 0);
    }

    #[tokio::test]
    async fn provider_failure_becomes_apology() {
        let f = fixture(vec![
            Ok(intent_json("chat", 0.9)),
            Err(ProviderError::Api {
                status: 401,
                message: "bad key".into(),
            }),
        ])
        .await;

        let reply = f
            .manager
            .process_message("hello there", ChannelTag::Web, "u1", None)
            .await;
        assert!(reply.starts_with("Sorry, something went wrong"));
        assert!(!reply.contains("bad key"), "raw provider error must not leak");
        assert_eq!(f.manager.state.state(), AgentState::Idle);
    }

    #[tokio::test]
    async fn task_step_exposes_only_hinted_tools() {
        let f = fixture(vec![
            Ok(ScriptedProvider::tool_response("clock", json!({}))),
            Ok(ScriptedProvider::text_response("step done")),
        ])
        .await;

        let out = f
            .manager
            .run_task_step("check the time", &["clock".to_string()], ModelTier::Subagent)
            .await
            .unwrap();
        assert_eq!(out, "step done");
        assert_eq!(f.clock.call_count(), 1);

        // Least privilege: the request carried only the hinted tool.
        let calls = f.provider.calls.lock().unwrap();
        for call in calls.iter() {
            assert_eq!(call.tools.len(), 1);
            assert_eq!(call.tools[0].name, "clock");
            assert_eq!(call.model, "mid");
        }
    }

    #[tokio::test]
    async fn cancel_message_latches_and_resets() {
        let f = fixture(vec![]).await;
        let reply = f
            .manager
            .process_message("cancel", ChannelTag::Telegram, "u1", None)
            .await;
        assert_eq!(reply, "Cancelled.");
        assert_eq!(f.manager.state.state(), AgentState::Idle);
    }
}
