//! Critic — scores a finished run against its goal before delivery, and
//! produces one refinement pass when the result falls short. Fail-open: a
//! broken critic never blocks delivery.

use tracing::debug;

use steward_agent::router::{ModelRouter, ModelTier};

use crate::types::{CriticVerdict, Subtask};

/// Score at or above which a decomposition is worth keeping as a template.
pub const TEMPLATE_SCORE: f64 = 0.7;

pub struct Critic;

impl Critic {
    /// Evaluate the run. `None` means the critic itself failed; callers
    /// fall back to a passing default.
    pub async fn evaluate(
        router: &ModelRouter,
        goal: &str,
        subtasks: &[Subtask],
        outputs: &[String],
    ) -> Option<CriticVerdict> {
        let plan = subtasks
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s.description))
            .collect::<Vec<_>>()
            .join("\n");
        let results = outputs
            .iter()
            .map(|o| truncate(o, 300))
            .collect::<Vec<_>>()
            .join("\n---\n");

        let system = "You are a strict quality critic. Output only JSON.";
        let prompt = format!(
            "Score how well these results satisfy the goal. Reply ONLY with JSON:\n\
             {{\"score\": 0.0-1.0, \"passed\": true|false, \"refinement_hint\": \"...\"}}\n\
             passed=false when key parts of the goal are unmet; then refinement_hint \
             says in one sentence what to improve.\n\n\
             Goal: {goal}\n\nPlan:\n{plan}\n\nResults:\n{results}"
        );

        let text = match router.complete(ModelTier::Chat, system, &prompt, 300).await {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "critic call failed");
                return None;
            }
        };

        let cleaned = text.replace("```json", "").replace("```", "");
        match serde_json::from_str::<CriticVerdict>(cleaned.trim()) {
            Ok(mut verdict) => {
                verdict.score = verdict.score.clamp(0.0, 1.0);
                Some(verdict)
            }
            Err(e) => {
                debug!(error = %e, "critic JSON unparseable");
                None
            }
        }
    }

    /// One refinement pass driven by the critic's hint.
    pub async fn refine(
        router: &ModelRouter,
        goal: &str,
        outputs: &[String],
        hint: &str,
    ) -> Option<String> {
        let results = outputs
            .iter()
            .map(|o| truncate(o, 400))
            .collect::<Vec<_>>()
            .join("\n---\n");
        let prompt = format!(
            "Improve this result per the critique. Return only the improved result.\n\
             Goal: {goal}\nCritique: {hint}\n\nCurrent result:\n{results}"
        );
        let refined = router
            .complete(ModelTier::Subagent, "You refine task results.", &prompt, 1500)
            .await
            .ok()?;
        if refined.trim().is_empty() {
            None
        } else {
            Some(refined)
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
