//! Context thalamus — character budgeting and conversation-history
//! windowing. Keeps every prompt section inside its budget (roughly 4 chars
//! per token) and collapses over-long histories into a synthetic summary
//! turn instead of letting them grow without bound.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Brain context budget (~400 tokens).
pub const BUDGET_BRAIN_CONTEXT: usize = 1600;
/// Intelligence-principles budget (~300 tokens).
pub const BUDGET_PRINCIPLES: usize = 1200;
/// Turns kept verbatim per session (each turn is two messages).
pub const MAX_HISTORY_TURNS: usize = 20;

const TRUNCATION_MARK: &str = "\n[...truncated]";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

/// Per-session conversation histories keyed by user id.
#[derive(Default)]
pub struct ContextThalamus {
    histories: Mutex<HashMap<String, Vec<HistoryMessage>>>,
}

impl ContextThalamus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce the brain-context budget, cutting at the last newline.
    pub fn budget_brain_context(&self, context: &str) -> String {
        enforce_budget(context, BUDGET_BRAIN_CONTEXT)
    }

    /// Enforce the principles budget.
    pub fn budget_principles(&self, principles: &str) -> String {
        enforce_budget(principles, BUDGET_PRINCIPLES)
    }

    /// Append a turn and return the managed history for the session.
    ///
    /// When the history exceeds the window, the displaced tail is replaced
    /// by one synthetic "prior conversation summary" user turn built from
    /// the first 50 chars of up to 5 displaced user messages.
    pub fn manage_history(
        &self,
        user_id: &str,
        user_msg: &str,
        assistant_msg: &str,
    ) -> Vec<HistoryMessage> {
        let mut histories = self.histories.lock().unwrap();
        let history = histories.entry(user_id.to_string()).or_default();

        history.push(HistoryMessage {
            role: "user".into(),
            content: user_msg.to_string(),
        });
        history.push(HistoryMessage {
            role: "assistant".into(),
            content: assistant_msg.to_string(),
        });

        let max_messages = MAX_HISTORY_TURNS * 2;
        if history.len() > max_messages {
            let displaced: Vec<HistoryMessage> =
                history.drain(..history.len() - max_messages).collect();
            let summary = summarize_turns(&displaced);
            history.insert(
                0,
                HistoryMessage {
                    role: "user".into(),
                    content: format!("[Previous conversation summary: {summary}]"),
                },
            );
        }

        history.clone()
    }

    pub fn history(&self, user_id: &str) -> Vec<HistoryMessage> {
        self.histories
            .lock()
            .unwrap()
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_history(&self, user_id: &str) {
        self.histories.lock().unwrap().remove(user_id);
    }

    pub fn active_sessions(&self) -> usize {
        self.histories.lock().unwrap().len()
    }
}

fn enforce_budget(text: &str, budget: usize) -> String {
    if text.len() <= budget {
        return text.to_string();
    }
    let keep = budget.saturating_sub(TRUNCATION_MARK.len());
    let mut cut = keep;
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    let mut truncated = &text[..cut];
    if let Some(pos) = truncated.rfind('\n') {
        if pos > 0 {
            truncated = &truncated[..pos];
        }
    }
    format!("{truncated}{TRUNCATION_MARK}")
}

/// Extractive summary of displaced turns: first 50 chars of each user
/// message, up to 5 topics.
fn summarize_turns(turns: &[HistoryMessage]) -> String {
    let topics: Vec<String> = turns
        .iter()
        .filter(|t| t.role == "user" && t.content.len() > 10)
        .map(|t| t.content.chars().take(50).collect::<String>().trim().to_string())
        .take(5)
        .collect();

    if topics.is_empty() {
        "Earlier conversation about various topics.".to_string()
    } else {
        format!("Discussed: {}", topics.join("; "))
    }
}
