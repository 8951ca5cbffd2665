//! Goal decomposer — asks a small model to break a goal into ordered
//! subtasks with tool hints, tiers, and verification criteria. Tool hints
//! are validated against the registered tool set; episodes feed the prompt
//! as success-rate priors so the model leans on tools that have worked.

use serde_json::Value;
use tracing::debug;

use steward_agent::router::{ModelRouter, ModelTier};

use crate::error::{Result, TaskError};
use crate::types::Subtask;

/// Hard cap so a runaway decomposition cannot enqueue dozens of steps.
const MAX_SUBTASKS: usize = 10;

pub struct GoalDecomposer;

impl GoalDecomposer {
    pub async fn decompose(
        router: &ModelRouter,
        goal: &str,
        available_tools: &[String],
        priors: &[(String, f64, usize)],
    ) -> Result<Vec<Subtask>> {
        let priors_text = if priors.is_empty() {
            "none recorded yet".to_string()
        } else {
            priors
                .iter()
                .take(10)
                .map(|(tool, rate, n)| format!("{tool}: {:.0}% over {n} runs", rate * 100.0))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let system = "You are a task planner. Output only a JSON array, no prose.";
        let prompt = format!(
            "Break this goal into ordered subtasks (max {MAX_SUBTASKS}). Each subtask is JSON:\n\
             {{\"description\": \"...\", \"tool_hints\": [\"tool\"], \"tier\": \"light|heavy\",\n\
              \"verification_criteria\": \"how to tell it worked\", \"reversible\": true|false}}\n\n\
             Available tools: {tools}\n\
             Tool success rates so far: {priors_text}\n\
             Mark reversible=false only for steps with effects that cannot be undone \
             (sending, posting, deleting). The final subtask should synthesize the result.\n\n\
             Goal: {goal}",
            tools = available_tools.join(", "),
        );

        let text = router
            .complete(ModelTier::Chat, system, &prompt, 1200)
            .await
            .map_err(|e| TaskError::Decompose(e.to_string()))?;

        Self::parse(&text, available_tools)
    }

    /// Parse and validate the model's plan. Unknown tool hints are dropped;
    /// an empty plan is an error.
    pub fn parse(text: &str, available_tools: &[String]) -> Result<Vec<Subtask>> {
        let cleaned = text.replace("```json", "").replace("```", "");
        let raw: Vec<Value> = serde_json::from_str(cleaned.trim())
            .map_err(|e| TaskError::Decompose(format!("plan is not a JSON array: {e}")))?;

        let mut subtasks = Vec::new();
        for item in raw.into_iter().take(MAX_SUBTASKS) {
            let mut subtask: Subtask = match serde_json::from_value(item) {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, "dropping malformed subtask");
                    continue;
                }
            };
            if subtask.description.trim().is_empty() {
                continue;
            }
            subtask
                .tool_hints
                .retain(|hint| available_tools.iter().any(|t| t == hint));
            subtasks.push(subtask);
        }

        if subtasks.is_empty() {
            return Err(TaskError::Decompose("plan contained no usable subtasks".into()));
        }
        Ok(subtasks)
    }

    /// Ask for one alternative subtask after all retries were exhausted.
    pub async fn alternative_plan(
        router: &ModelRouter,
        failed_description: &str,
        error: &str,
        available_tools: &[String],
    ) -> Option<Subtask> {
        let system = "You are a task planner. Output only one JSON object, no prose.";
        let prompt = format!(
            "A step failed repeatedly. Propose ONE alternative step that reaches the same \
             outcome a different way. JSON object with the same fields as before \
             (description, tool_hints, tier, verification_criteria, reversible).\n\
             Available tools: {}\n\
             Failed step: {}\nLast error: {}",
            available_tools.join(", "),
            truncate(failed_description, 200),
            truncate(error, 200),
        );

        let text = router.complete(ModelTier::Chat, system, &prompt, 400).await.ok()?;
        let cleaned = text.replace("```json", "").replace("```", "");
        let mut subtask: Subtask = serde_json::from_str(cleaned.trim()).ok()?;
        subtask
            .tool_hints
            .retain(|hint| available_tools.iter().any(|t| t == hint));
        if subtask.description.trim().is_empty() {
            return None;
        }
        Some(subtask)
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tools() -> Vec<String> {
        vec!["web_fetch".into(), "shell".into()]
    }

    #[test]
    fn parses_a_plan_and_drops_unknown_hints() {
        let text = r#"```json
        [
          {"description": "search for funding rounds", "tool_hints": ["web_fetch", "crystal_ball"],
           "tier": "light", "verification_criteria": "three rounds listed", "reversible": true},
          {"description": "summarize findings", "tool_hints": [], "tier": "heavy",
           "verification_criteria": "summary exists", "reversible": true}
        ]
        ```"#;
        let plan = GoalDecomposer::parse(text, &tools()).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].tool_hints, vec!["web_fetch".to_string()]);
    }

    #[test]
    fn empty_plan_is_an_error() {
        assert!(GoalDecomposer::parse("[]", &tools()).is_err());
        assert!(GoalDecomposer::parse("not json", &tools()).is_err());
        // Subtasks with blank descriptions are dropped, leaving nothing.
        let blank = r#"[{"description": "  ", "tool_hints": []}]"#;
        assert!(GoalDecomposer::parse(blank, &tools()).is_err());
    }

    #[test]
    fn plan_is_capped() {
        let many: Vec<Value> = (0..20)
            .map(|i| serde_json::json!({"description": format!("step {i}"), "tool_hints": []}))
            .collect();
        let text = serde_json::to_string(&many).unwrap();
        let plan = GoalDecomposer::parse(&text, &tools()).unwrap();
        assert_eq!(plan.len(), 10);
    }
}
