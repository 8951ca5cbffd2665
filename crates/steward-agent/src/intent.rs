//! Intent classification: a small-model JSON call with a rule-based local
//! fallback. Low-confidence classifications are re-run on the large tier by
//! the pipeline.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::router::{ModelRouter, ModelTier};

/// Confidence below which the pipeline escalates to the large model.
pub const ESCALATION_THRESHOLD: f64 = 0.6;

/// Fixed action vocabulary. Anything the classifier cannot place lands on
/// `chat`.
pub const ACTIONS: &[&str] = &[
    "chat",
    "read_calendar",
    "manage_email",
    "set_reminder",
    "post_social",
    "run_task",
    "get_status",
    "cancel",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub action: String,
    pub confidence: f64,
    #[serde(default)]
    pub parameters: Value,
}

/// Classify a message on the given tier. Any provider or parse failure
/// degrades to the rule-based classifier — intent must never take a turn
/// down.
pub async fn classify(router: &ModelRouter, message: &str, tier: ModelTier) -> Intent {
    let system = format!(
        "Classify the user's message into exactly one action from this list: {}.\n\
         Reply ONLY with JSON: {{\"action\": \"...\", \"confidence\": 0.0-1.0, \"parameters\": {{}}}}.\n\
         parameters may carry extracted details (e.g. reminder text, recipient).",
        ACTIONS.join(", ")
    );

    match router.complete(tier, &system, message, 200).await {
        Ok(text) => parse_intent(&text).unwrap_or_else(|| {
            debug!("intent JSON unparseable, using rule-based fallback");
            classify_locally(message)
        }),
        Err(e) => {
            debug!(error = %e, "intent model failed, using rule-based fallback");
            classify_locally(message)
        }
    }
}

fn parse_intent(text: &str) -> Option<Intent> {
    let cleaned = text.replace("```json", "").replace("```", "");
    let intent: Intent = serde_json::from_str(cleaned.trim()).ok()?;
    if !ACTIONS.contains(&intent.action.as_str()) {
        return None;
    }
    Some(Intent {
        confidence: intent.confidence.clamp(0.0, 1.0),
        ..intent
    })
}

/// Keyword fallback when no model is reachable.
pub fn classify_locally(message: &str) -> Intent {
    let lower = message.to_lowercase();

    let (action, confidence) = if lower.trim() == "cancel" || lower.starts_with("cancel ") {
        ("cancel", 0.9)
    } else if lower.contains("remind") {
        ("set_reminder", 0.7)
    } else if lower.contains("calendar") || lower.contains("meeting") || lower.contains("schedule")
    {
        ("read_calendar", 0.6)
    } else if lower.contains("email") || lower.contains("inbox") {
        ("manage_email", 0.6)
    } else if lower.contains("post") || lower.contains("tweet") {
        ("post_social", 0.6)
    } else if lower.contains("research") || lower.contains("find out") || lower.contains("task") {
        ("run_task", 0.5)
    } else if lower.contains("status") || lower.contains("health") {
        ("get_status", 0.6)
    } else {
        ("chat", 0.4)
    };

    Intent {
        action: action.to_string(),
        confidence,
        parameters: Value::Object(Default::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json() {
        let intent =
            parse_intent("```json\n{\"action\": \"set_reminder\", \"confidence\": 0.92}\n```")
                .unwrap();
        assert_eq!(intent.action, "set_reminder");
        assert!((intent.confidence - 0.92).abs() < 1e-9);
    }

    #[test]
    fn rejects_unknown_actions() {
        assert!(parse_intent("{\"action\": \"reboot_universe\", \"confidence\": 1.0}").is_none());
    }

    #[test]
    fn local_fallback_covers_the_vocabulary() {
        assert_eq!(classify_locally("remind me to call mom").action, "set_reminder");
        assert_eq!(classify_locally("what's on my calendar?").action, "read_calendar");
        assert_eq!(classify_locally("post on x: hello").action, "post_social");
        assert_eq!(classify_locally("cancel").action, "cancel");
        assert_eq!(classify_locally("how was your day").action, "chat");
    }
}
