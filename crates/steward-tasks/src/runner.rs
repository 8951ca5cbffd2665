//! Autonomous task runner. Polls the queue, processes one task at a time to
//! completion (single-writer), and per task: tool-success priors → goal
//! decomposition → announced plan → in-order subtask execution with retries,
//! semantic hints and one re-delegation → critic → template store → chunked
//! delivery.
//!
//! Cancellation is cooperative: task status is re-checked before every
//! subtask, so an externally-failed task stops at the next boundary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use steward_agent::router::{ModelRouter, ModelTier};
use steward_agent::ConversationManager;
use steward_channels::{Notifier, NotifyLevel};
use steward_memory::types::Episode;
use steward_memory::Brain;

use crate::critic::{Critic, TEMPLATE_SCORE};
use crate::decompose::GoalDecomposer;
use crate::error::Result;
use crate::queue::TaskQueue;
use crate::templates::TemplateLibrary;
use crate::types::{
    AuditEntry, CriticVerdict, StepTier, Subtask, SubtaskStatus, Task, TaskStatus,
};

/// Telegram-bound report chunks.
const CHUNK: usize = 3800;
/// Condensed WhatsApp variant length.
const WHATSAPP_CONDENSED: usize = 1200;

/// Executes one subtask prompt under a tool allow-list. Implemented by the
/// conversation manager; mocked in tests.
#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    async fn run_step(
        &self,
        prompt: &str,
        allowed_tools: &[String],
        tier: ModelTier,
    ) -> std::result::Result<String, String>;
}

#[async_trait]
impl SubtaskExecutor for ConversationManager {
    async fn run_step(
        &self,
        prompt: &str,
        allowed_tools: &[String],
        tier: ModelTier,
    ) -> std::result::Result<String, String> {
        self.run_task_step(prompt, allowed_tools, tier).await
    }
}

#[derive(Clone)]
pub struct TaskRunnerConfig {
    pub data_dir: PathBuf,
    pub retry_attempts: u32,
    pub poll_interval: Duration,
    /// Warning window before an irreversible subtask runs.
    pub irreversible_grace: Duration,
    pub rate_limit_backoff: Duration,
    pub whatsapp_condensed: bool,
}

impl TaskRunnerConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            retry_attempts: 3,
            poll_interval: Duration::from_secs(15),
            irreversible_grace: Duration::from_secs(10),
            rate_limit_backoff: Duration::from_secs(30),
            whatsapp_condensed: false,
        }
    }
}

struct SubtaskOutcome {
    text: String,
    attempts: u32,
    re_delegated: bool,
    success: bool,
}

pub struct TaskRunner {
    queue: Arc<TaskQueue>,
    executor: Arc<dyn SubtaskExecutor>,
    router: Arc<ModelRouter>,
    brain: Arc<Brain>,
    templates: Arc<TemplateLibrary>,
    notifier: Arc<dyn Notifier>,
    whatsapp: Option<Arc<dyn Notifier>>,
    available_tools: Vec<String>,
    config: TaskRunnerConfig,
}

impl TaskRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<TaskQueue>,
        executor: Arc<dyn SubtaskExecutor>,
        router: Arc<ModelRouter>,
        brain: Arc<Brain>,
        templates: Arc<TemplateLibrary>,
        notifier: Arc<dyn Notifier>,
        whatsapp: Option<Arc<dyn Notifier>>,
        available_tools: Vec<String>,
        config: TaskRunnerConfig,
    ) -> Self {
        Self {
            queue,
            executor,
            router,
            brain,
            templates,
            notifier,
            whatsapp,
            available_tools,
            config,
        }
    }

    /// Background loop. One task at a time; loop errors are logged, never
    /// fatal.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("task runner started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("task runner shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(e) = self.process_next_task().await {
                        error!(error = %e, "task runner loop error");
                    }
                }
            }
        }
    }

    /// Pick up and execute the next pending task, if any.
    pub async fn process_next_task(&self) -> Result<()> {
        let Some(task) = self.queue.dequeue_next() else {
            return Ok(());
        };
        info!(task = %task.id, goal = %safe(&task.goal, 60), "task picked up");

        if task.notify_on_complete {
            self.notify(&format!("Task started: {}", safe(&task.goal, 80)), NotifyLevel::Info)
                .await;
        }

        // 1. Tool-success priors from recent episodes.
        let priors = self.brain.tool_success_rates(100);

        // 2. Decompose, reusing a stored template when one matches.
        let subtasks = match self.templates.lookup(&task.goal) {
            Some(subtasks) => {
                info!(task = %task.id, "reusing stored decomposition template");
                subtasks
            }
            None => {
                match GoalDecomposer::decompose(
                    &self.router,
                    &task.goal,
                    &self.available_tools,
                    &priors,
                )
                .await
                {
                    Ok(s) => s,
                    Err(e) => {
                        warn!(task = %task.id, error = %e, "decomposition failed");
                        self.queue.mark_failed(&task.id, &e.to_string())?;
                        self.notify_failure(&task, &e.to_string()).await;
                        return Ok(());
                    }
                }
            }
        };
        self.queue.set_subtasks(&task.id, subtasks.clone())?;
        info!(task = %task.id, steps = subtasks.len(), "decomposed");

        // 3. Announce the plan, flagging irreversible steps.
        if task.notify_on_complete {
            self.announce_plan(&subtasks).await;
        }

        // 4. Execute subtasks in order.
        let mut all_results: Vec<String> = Vec::new();
        let mut audit: Vec<AuditEntry> = Vec::new();
        let total = subtasks.len();

        for (idx, subtask) in subtasks.iter().enumerate() {
            // Cancellation propagates here: an externally-failed task stops
            // before the next subtask starts.
            if self.queue.status_of(&task.id) == Some(TaskStatus::Failed) {
                info!(task = %task.id, "task cancelled, stopping run");
                self.write_audit(&task.id, &audit);
                return Ok(());
            }

            self.queue
                .update_subtask(&task.id, idx, SubtaskStatus::Running, None, None)?;
            if task.notify_on_complete {
                self.notify(
                    &format!("[{}/{}] {}", idx + 1, total, safe(&subtask.description, 80)),
                    NotifyLevel::Info,
                )
                .await;
            }

            if !subtask.reversible {
                self.notify(
                    &format!(
                        "Heads up: the next step is irreversible ({}). Cancel the task now if you don't want it.",
                        safe(&subtask.description, 80)
                    ),
                    NotifyLevel::Warning,
                )
                .await;
                tokio::time::sleep(self.config.irreversible_grace).await;
                if self.queue.status_of(&task.id) == Some(TaskStatus::Failed) {
                    info!(task = %task.id, "cancelled during irreversible grace window");
                    self.write_audit(&task.id, &audit);
                    return Ok(());
                }
            }

            let outcome = self.execute_subtask(&task, subtask, idx, &all_results).await;

            let status = if outcome.re_delegated {
                SubtaskStatus::ReDelegated
            } else if outcome.success {
                SubtaskStatus::Done
            } else {
                SubtaskStatus::Failed
            };
            self.queue.update_subtask(
                &task.id,
                idx,
                status,
                outcome.success.then_some(outcome.text.as_str()),
                (!outcome.success).then_some(outcome.text.as_str()),
            )?;

            // Every subtask leaves an episode for the pattern detector and
            // the decomposer's priors.
            let episode = Episode {
                action: subtask.description.clone(),
                outcome: safe(&outcome.text, 200),
                success: outcome.success,
                tool_used: subtask
                    .tool_hints
                    .first()
                    .cloned()
                    .unwrap_or_else(|| "none".into()),
                context: Some(task.goal.clone()),
                timestamp: chrono::Utc::now().to_rfc3339(),
            };
            if let Err(e) = self.brain.record_episode(&episode).await {
                warn!(error = %e, "episode store failed");
            }

            audit.push(AuditEntry {
                subtask_index: idx,
                description: subtask.description.clone(),
                attempts: outcome.attempts,
                re_delegated: outcome.re_delegated,
                success: outcome.success,
                outcome: safe(&outcome.text, 300),
                finished_at: chrono::Utc::now().to_rfc3339(),
            });

            if task.notify_on_complete {
                let mark = if outcome.success { "ok" } else { "failed" };
                self.notify(
                    &format!("[{}/{}] {}: {}", idx + 1, total, mark, safe(&outcome.text, 100)),
                    NotifyLevel::Info,
                )
                .await;
            }

            all_results.push(format!("Step {}: {}", idx + 1, outcome.text));
        }

        // 5. Critic pass; a broken critic defaults to a pass.
        let verdict = Critic::evaluate(&self.router, &task.goal, &subtasks, &all_results)
            .await
            .unwrap_or(CriticVerdict {
                score: 0.8,
                passed: true,
                refinement_hint: None,
            });
        info!(task = %task.id, score = verdict.score, passed = verdict.passed, "critic verdict");

        if !verdict.passed {
            if let Some(ref hint) = verdict.refinement_hint {
                if let Some(refined) =
                    Critic::refine(&self.router, &task.goal, &all_results, hint).await
                {
                    all_results.push(format!("Step {} (refined): {refined}", all_results.len() + 1));
                }
            }
        }

        // 6. Keep good decompositions for reuse.
        if verdict.score >= TEMPLATE_SCORE {
            self.templates.store(&task.goal, &subtasks, verdict.score);
        }

        // 7. Report, audit trail, delivery.
        let summary = build_summary(&all_results);
        self.queue.mark_done(&task.id, &summary)?;
        let report = self.write_report(&task, &all_results, &verdict);
        self.write_audit(&task.id, &audit);

        if task.notify_on_complete {
            self.deliver(&task, &report).await;
        }
        info!(task = %task.id, "task completed");
        Ok(())
    }

    async fn execute_subtask(
        &self,
        task: &Task,
        subtask: &Subtask,
        idx: usize,
        prior_results: &[String],
    ) -> SubtaskOutcome {
        let tier = match subtask.tier {
            StepTier::Light => ModelTier::Chat,
            StepTier::Heavy => ModelTier::Subagent,
        };
        let mut prompt = build_step_prompt(task, subtask, idx, prior_results);
        let mut last_error = String::new();

        for attempt in 0..self.config.retry_attempts {
            match self
                .executor
                .run_step(&prompt, &subtask.tool_hints, tier)
                .await
            {
                Ok(result) => {
                    return SubtaskOutcome {
                        text: if result.is_empty() {
                            "Step completed (no output)".into()
                        } else {
                            result
                        },
                        attempts: attempt + 1,
                        re_delegated: false,
                        success: true,
                    }
                }
                Err(e) => {
                    last_error = e;
                    if attempt + 1 < self.config.retry_attempts {
                        if is_rate_limited(&last_error) {
                            warn!(task = %task.id, step = idx + 1, "rate limited, backing off");
                            tokio::time::sleep(self.config.rate_limit_backoff).await;
                        } else {
                            let hint = self.retry_hint(&subtask.description, &last_error).await;
                            warn!(task = %task.id, step = idx + 1, hint = %safe(&hint, 80), "retrying with hint");
                            prompt = format!(
                                "PREVIOUS ATTEMPT FAILED: {}\nHINT FOR THIS RETRY: {hint}\n\n---\n{prompt}",
                                safe(&last_error, 200)
                            );
                        }
                    }
                }
            }
        }

        // All retries exhausted: one alternative plan, tried once.
        if let Some(alt) = GoalDecomposer::alternative_plan(
            &self.router,
            &subtask.description,
            &last_error,
            &self.available_tools,
        )
        .await
        {
            info!(task = %task.id, step = idx + 1, "re-delegating with alternative plan");
            let alt_prompt = build_step_prompt(task, &alt, idx, prior_results);
            if let Ok(result) = self.executor.run_step(&alt_prompt, &alt.tool_hints, tier).await {
                return SubtaskOutcome {
                    text: result,
                    attempts: self.config.retry_attempts + 1,
                    re_delegated: true,
                    success: true,
                };
            }
        }

        SubtaskOutcome {
            text: format!("ERROR: {}", safe(&last_error, 200)),
            attempts: self.config.retry_attempts,
            re_delegated: false,
            success: false,
        }
    }

    /// One-sentence "try differently" hint from the cheap tier.
    async fn retry_hint(&self, description: &str, error: &str) -> String {
        let prompt = format!(
            "An agent failed a task step. In 1-2 sentences only, suggest what it should try \
             differently on the next attempt.\nStep: {}\nError: {}",
            safe(description, 200),
            safe(error, 200)
        );
        self.router
            .complete(ModelTier::Chat, "You give terse retry advice.", &prompt, 128)
            .await
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| {
                "Try a different approach or a different tool for this step.".to_string()
            })
    }

    async fn announce_plan(&self, subtasks: &[Subtask]) {
        let irreversible = subtasks.iter().filter(|s| !s.reversible).count();
        let steps = subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, safe(&s.description, 40)))
            .collect::<Vec<_>>()
            .join(" | ");
        let mut msg = format!("Plan ({} steps): {steps}", subtasks.len());
        if irreversible > 0 {
            msg.push_str(&format!(" [{irreversible} irreversible]"));
        }
        self.notify(&msg, NotifyLevel::Info).await;
    }

    fn write_report(&self, task: &Task, results: &[String], verdict: &CriticVerdict) -> String {
        let report = format!(
            "Goal: {}\nCompleted: {}\nCritic score: {:.2}\n\n{}\n",
            task.goal,
            chrono::Utc::now().to_rfc3339(),
            verdict.score,
            results.join("\n\n")
        );
        let dir = self.config.data_dir.join("tasks");
        if let Err(e) = std::fs::create_dir_all(&dir)
            .and_then(|_| std::fs::write(dir.join(format!("{}.txt", task.id)), &report))
        {
            warn!(task = %task.id, error = %e, "report write failed");
        }
        report
    }

    fn write_audit(&self, task_id: &str, audit: &[AuditEntry]) {
        let path = self
            .config
            .data_dir
            .join("tasks")
            .join(format!("{task_id}_audit.json"));
        if let Err(e) = steward_core::statefile::save_atomic(&path, &audit.to_vec()) {
            warn!(task = %task_id, error = %e, "audit write failed");
        }
    }

    /// Full report in 3800-char chunks; first chunk carries the header, the
    /// rest are labeled `(continued N)`. Condensed WhatsApp copy optional.
    async fn deliver(&self, task: &Task, report: &str) {
        let header = format!("Done: {}\n\n", safe(&task.goal, 80));
        let first_len = CHUNK.saturating_sub(header.len());
        let (first, mut rest) = split_at_char(report, first_len);
        self.notify(&format!("{header}{first}"), NotifyLevel::Success).await;

        let mut part = 2;
        while !rest.is_empty() {
            let (chunk, tail) = split_at_char(&rest, CHUNK);
            self.notify(&format!("(continued {part})\n\n{chunk}"), NotifyLevel::Info)
                .await;
            rest = tail;
            part += 1;
        }

        if self.config.whatsapp_condensed {
            if let Some(ref whatsapp) = self.whatsapp {
                let condensed: String = report.chars().take(WHATSAPP_CONDENSED).collect();
                whatsapp
                    .notify(&format!("Done!\n\n{condensed}"), NotifyLevel::Success)
                    .await;
            }
        }
    }

    async fn notify_failure(&self, task: &Task, error: &str) {
        self.notify(
            &format!(
                "Task failed: {}\nReason: {}",
                safe(&task.goal, 60),
                safe(error, 120)
            ),
            NotifyLevel::Warning,
        )
        .await;
        if let Some(ref whatsapp) = self.whatsapp {
            whatsapp
                .notify(
                    &format!("Sorry, I couldn't complete that task. {}", safe(error, 100)),
                    NotifyLevel::Warning,
                )
                .await;
        }
    }

    async fn notify(&self, text: &str, level: NotifyLevel) {
        self.notifier.notify(text, level).await;
    }
}

fn build_step_prompt(task: &Task, subtask: &Subtask, idx: usize, prior_results: &[String]) -> String {
    let context = if prior_results.is_empty() {
        String::new()
    } else {
        let recent = prior_results
            .iter()
            .rev()
            .take(3)
            .rev()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        format!("PREVIOUS STEPS COMPLETED:\n{recent}\n\n---\n")
    };

    let mut prompt = format!(
        "{context}BACKGROUND TASK (ID: {})\nOverall goal: {}\n\nCurrent step ({}): {}\n\n\
         Complete this step and report what you found or did. Be thorough.",
        task.id,
        task.goal,
        idx + 1,
        subtask.description
    );
    if !subtask.tool_hints.is_empty() {
        prompt.push_str(&format!(
            "\n\nSuggested tools for this step: {}",
            subtask.tool_hints.join(", ")
        ));
    }
    if !subtask.verification_criteria.is_empty() {
        prompt.push_str(&format!("\nDone when: {}", subtask.verification_criteria));
    }
    prompt
}

fn is_rate_limited(error: &str) -> bool {
    error.contains("429") || error.to_lowercase().contains("rate limit")
}

/// Final summary: the last (synthesis) step's output, trimmed.
fn build_summary(results: &[String]) -> String {
    let Some(last) = results.last() else {
        return "No results collected.".to_string();
    };
    let body = last.split_once(": ").map(|(_, b)| b).unwrap_or(last);
    let mut out: String = body.chars().take(800).collect();
    if body.len() > 800 {
        out.push_str("...");
    }
    out
}

/// Markdown-stripped truncation so notifications never choke a transport.
fn safe(text: &str, limit: usize) -> String {
    text.chars()
        .filter(|c| !matches!(c, '*' | '_' | '`' | '[' | ']'))
        .take(limit)
        .collect()
}

fn split_at_char(text: &str, limit: usize) -> (String, String) {
    if text.len() <= limit {
        return (text.to_string(), String::new());
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    (text[..cut].to_string(), text[cut..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use steward_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
    use steward_agent::router::TierModels;
    use steward_memory::embed::HashEmbedder;

    struct CannedProvider {
        responses: Mutex<VecDeque<String>>,
    }

    impl CannedProvider {
        fn new(responses: Vec<&str>) -> Self {
            Self {
                responses: Mutex::new(responses.into_iter().map(String::from).collect()),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }
        async fn send(&self, req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| "ok".to_string());
            Ok(ChatResponse {
                content: text,
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "end_turn".into(),
                tool_calls: vec![],
            })
        }
    }

    struct ScriptedExecutor {
        results: Mutex<VecDeque<std::result::Result<String, String>>>,
        cancel_after_first: Mutex<Option<(Arc<TaskQueue>, String)>>,
    }

    #[async_trait]
    impl SubtaskExecutor for ScriptedExecutor {
        async fn run_step(
            &self,
            _prompt: &str,
            _allowed_tools: &[String],
            _tier: ModelTier,
        ) -> std::result::Result<String, String> {
            if let Some((queue, id)) = self.cancel_after_first.lock().unwrap().take() {
                queue.cancel(&id).unwrap();
            }
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok("default".into()))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<(String, NotifyLevel)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, text: &str, level: NotifyLevel) {
            self.messages.lock().unwrap().push((text.to_string(), level));
        }
    }

    fn plan_json() -> &'static str {
        r#"[
          {"description": "gather recent AI infra funding rounds", "tool_hints": ["web_fetch"],
           "tier": "light", "verification_criteria": "three rounds found", "reversible": true},
          {"description": "pull details for each round", "tool_hints": ["web_fetch"],
           "tier": "light", "verification_criteria": "details collected", "reversible": true},
          {"description": "write the summary", "tool_hints": [], "tier": "heavy",
           "verification_criteria": "summary produced", "reversible": true}
        ]"#
    }

    struct Fixture {
        runner: Arc<TaskRunner>,
        queue: Arc<TaskQueue>,
        executor: Arc<ScriptedExecutor>,
        notifier: Arc<RecordingNotifier>,
        dir: tempfile::TempDir,
    }

    async fn fixture(
        router_responses: Vec<&str>,
        executor_results: Vec<std::result::Result<String, String>>,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(TaskQueue::load(dir.path().join("task_queue.json")));
        let brain = Arc::new(
            Brain::open(dir.path(), Arc::new(HashEmbedder::default())).await.unwrap(),
        );
        let templates = Arc::new(TemplateLibrary::load(dir.path().join("templates.json")));
        let notifier = Arc::new(RecordingNotifier::default());
        let router = Arc::new(ModelRouter::new(
            TierModels {
                default: "big".into(),
                subagent: "mid".into(),
                chat: "small".into(),
                intent: "small".into(),
            },
            Arc::new(CannedProvider::new(router_responses)),
            None,
        ));
        let executor = Arc::new(ScriptedExecutor {
            results: Mutex::new(executor_results.into_iter().collect()),
            cancel_after_first: Mutex::new(None),
        });

        let mut config = TaskRunnerConfig::new(dir.path());
        config.retry_attempts = 3;
        config.irreversible_grace = Duration::from_millis(5);
        config.rate_limit_backoff = Duration::from_millis(5);

        let runner = Arc::new(TaskRunner::new(
            queue.clone(),
            executor.clone(),
            router,
            brain,
            templates,
            notifier.clone(),
            None,
            vec!["web_fetch".into(), "shell".into()],
            config,
        ));
        Fixture {
            runner,
            queue,
            executor,
            notifier,
            dir,
        }
    }

    #[tokio::test]
    async fn full_run_with_re_delegation() {
        let alt = r#"{"description": "fetch details from an alternate source", "tool_hints": ["shell"], "tier": "light", "verification_criteria": "", "reversible": true}"#;
        let critic = r#"{"score": 0.85, "passed": true}"#;
        let f = fixture(
            // decompose, retry hint x2, alternative plan, critic
            vec![plan_json(), "try a narrower query", "try caching", alt, critic],
            vec![
                Ok("found rounds A, B, C".into()),
                Err("fetch failed: DNS".into()),
                Err("fetch failed: DNS".into()),
                Err("fetch failed: DNS".into()),
                Ok("details collected via alternate source".into()),
                Ok("summary: three rounds totalling $4.2B".into()),
            ],
        )
        .await;

        let task = f
            .queue
            .enqueue("research the 3 biggest recent AI infra funding rounds", None, true);
        f.runner.process_next_task().await.unwrap();

        let done = f.queue.get(&task.id).unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.result.unwrap().contains("three rounds"));
        assert_eq!(done.subtasks[1].status, SubtaskStatus::ReDelegated);

        // Report file exists under tasks/.
        let report = std::fs::read_to_string(
            f.dir.path().join("tasks").join(format!("{}.txt", task.id)),
        )
        .unwrap();
        assert!(report.contains("summary: three rounds"));

        // Audit trail records the re-delegation.
        let audit: Vec<AuditEntry> = serde_json::from_str(
            &std::fs::read_to_string(
                f.dir.path().join("tasks").join(format!("{}_audit.json", task.id)),
            )
            .unwrap(),
        )
        .unwrap();
        assert!(audit.iter().any(|a| a.subtask_index == 1 && a.re_delegated));

        // Template stored (score 0.85 >= 0.7).
        assert_eq!(f.runner.templates.len(), 1);

        // User got the plan, step updates, and the chunked final report.
        let messages = f.notifier.messages.lock().unwrap();
        assert!(messages.iter().any(|(m, _)| m.starts_with("Plan (3 steps)")));
        assert!(messages.iter().any(|(m, _)| m.starts_with("Done: research")));
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_subtask() {
        let f = fixture(vec![plan_json()], vec![Ok("step one done".into())]).await;
        let task = f.queue.enqueue("cancelled goal", None, false);

        // The executor cancels the task during the first step; steps 2 and 3
        // must never start.
        *f.executor.cancel_after_first.lock().unwrap() =
            Some((f.queue.clone(), task.id.clone()));
        f.runner.process_next_task().await.unwrap();

        let stopped = f.queue.get(&task.id).unwrap();
        assert_eq!(stopped.status, TaskStatus::Failed);
        assert!(stopped.subtasks[1..]
            .iter()
            .all(|s| s.status == SubtaskStatus::Pending));
    }

    #[tokio::test]
    async fn decomposition_failure_fails_the_task() {
        let f = fixture(vec!["this is not json"], vec![]).await;
        let task = f.queue.enqueue("impossible goal", None, true);
        f.runner.process_next_task().await.unwrap();

        assert_eq!(f.queue.status_of(&task.id), Some(TaskStatus::Failed));
        let messages = f.notifier.messages.lock().unwrap();
        assert!(messages.iter().any(|(m, _)| m.starts_with("Task failed")));
    }
}
