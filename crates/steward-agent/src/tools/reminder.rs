//! `reminder` tool — the AI calls this when the principal asks to be
//! reminded of something. Backed by the scheduler's reminder store through
//! a narrow trait so this crate stays independent of the scheduler.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use super::{Tool, ToolOutcome};

/// Narrow interface the reminder tool drives. Implemented by the reminder
/// store in the scheduler crate; mocked in tests.
pub trait ReminderBackend: Send + Sync {
    /// Returns the new reminder's id.
    fn add(&self, message: &str, remind_at: DateTime<Utc>) -> Result<String, String>;
    /// (id, message, remind_at RFC3339, status) per reminder.
    fn list(&self) -> Vec<(String, String, String, String)>;
    fn cancel(&self, id: &str) -> Result<(), String>;
}

impl<T: ReminderBackend + ?Sized> ReminderBackend for Arc<T> {
    fn add(&self, message: &str, remind_at: DateTime<Utc>) -> Result<String, String> {
        T::add(self, message, remind_at)
    }

    fn list(&self) -> Vec<(String, String, String, String)> {
        T::list(self)
    }

    fn cancel(&self, id: &str) -> Result<(), String> {
        T::cancel(self, id)
    }
}

pub struct ReminderTool<B: ReminderBackend> {
    backend: B,
}

impl<B: ReminderBackend> ReminderTool<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    fn add(&self, input: &Value) -> ToolOutcome {
        let Some(message) = input.get("message").and_then(Value::as_str).filter(|m| !m.is_empty())
        else {
            return ToolOutcome::failure("'message' is required for set_reminder");
        };

        let remind_at = if let Some(at) = input.get("remind_at").and_then(Value::as_str) {
            let dt = match DateTime::parse_from_rfc3339(at) {
                Ok(dt) => dt.with_timezone(&Utc),
                Err(e) => return ToolOutcome::failure(format!("invalid remind_at datetime: {e}")),
            };
            if dt <= Utc::now() {
                return ToolOutcome::failure(format!(
                    "cannot set a reminder in the past ({})",
                    dt.to_rfc3339()
                ));
            }
            dt
        } else if let Some(secs) = input.get("in_seconds").and_then(Value::as_i64) {
            if secs <= 0 {
                return ToolOutcome::failure("in_seconds must be a positive integer");
            }
            Utc::now() + Duration::seconds(secs)
        } else {
            return ToolOutcome::failure("one of 'remind_at' or 'in_seconds' is required");
        };

        match self.backend.add(message, remind_at) {
            Ok(id) => ToolOutcome::success(format!(
                "Reminder {id} set for {}: {message}",
                remind_at.to_rfc3339()
            )),
            Err(e) => ToolOutcome::failure(format!("failed to set reminder: {e}")),
        }
    }

    fn list(&self) -> ToolOutcome {
        let reminders = self.backend.list();
        if reminders.is_empty() {
            return ToolOutcome::success("No reminders scheduled.");
        }
        let mut out = format!("Reminders ({}):\n", reminders.len());
        for (id, message, at, status) in reminders {
            out.push_str(&format!("- [{id}] {message} at {at} ({status})\n"));
        }
        ToolOutcome::success(out)
    }

    fn cancel(&self, input: &Value) -> ToolOutcome {
        let Some(id) = input.get("id").and_then(Value::as_str).filter(|i| !i.is_empty()) else {
            return ToolOutcome::failure("'id' is required for cancel_reminder");
        };
        match self.backend.cancel(id) {
            Ok(()) => ToolOutcome::success(format!("Reminder {id} cancelled.")),
            Err(e) => ToolOutcome::failure(format!("failed to cancel reminder: {e}")),
        }
    }
}

#[async_trait]
impl<B: ReminderBackend> Tool for ReminderTool<B> {
    fn name(&self) -> &str {
        "reminder"
    }

    fn description(&self) -> &str {
        "ALWAYS use this tool when the user asks to be reminded or notified at \
         a future time. The reminder is delivered to the user's channel when it \
         fires. Do NOT answer with reminder text directly; call this tool. \
         Actions: set_reminder, list_reminders, cancel_reminder."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["set_reminder", "list_reminders", "cancel_reminder"],
                    "description": "Operation to perform."
                },
                "message": {
                    "type": "string",
                    "description": "Text to deliver when the reminder fires. Required for set_reminder."
                },
                "remind_at": {
                    "type": "string",
                    "description": "RFC3339 datetime when to fire. Mutually exclusive with in_seconds."
                },
                "in_seconds": {
                    "type": "integer",
                    "description": "Seconds from now when to fire. Mutually exclusive with remind_at."
                },
                "id": {
                    "type": "string",
                    "description": "Reminder id, required for cancel_reminder."
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: Value) -> ToolOutcome {
        match input.get("action").and_then(Value::as_str) {
            Some("set_reminder") => self.add(&input),
            Some("list_reminders") => self.list(),
            Some("cancel_reminder") => self.cancel(&input),
            Some(other) => ToolOutcome::failure(format!("unknown action '{other}'")),
            None => ToolOutcome::failure("missing required field 'action'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct StubBackend {
        added: Mutex<Vec<(String, DateTime<Utc>)>>,
    }

    impl ReminderBackend for StubBackend {
        fn add(&self, message: &str, remind_at: DateTime<Utc>) -> Result<String, String> {
            self.added.lock().unwrap().push((message.into(), remind_at));
            Ok("abcd1234".into())
        }
        fn list(&self) -> Vec<(String, String, String, String)> {
            self.added
                .lock()
                .unwrap()
                .iter()
                .map(|(m, at)| {
                    ("abcd1234".into(), m.clone(), at.to_rfc3339(), "pending".into())
                })
                .collect()
        }
        fn cancel(&self, id: &str) -> Result<(), String> {
            if id == "abcd1234" {
                Ok(())
            } else {
                Err("not found".into())
            }
        }
    }

    #[tokio::test]
    async fn sets_a_relative_reminder() {
        let tool = ReminderTool::new(StubBackend::default());
        let outcome = tool
            .execute(json!({"action": "set_reminder", "message": "call mom", "in_seconds": 120}))
            .await;
        assert!(outcome.success);
        assert!(outcome.output.unwrap().contains("call mom"));
    }

    #[tokio::test]
    async fn rejects_nonpositive_offsets() {
        let tool = ReminderTool::new(StubBackend::default());
        let outcome = tool
            .execute(json!({"action": "set_reminder", "message": "x", "in_seconds": 0}))
            .await;
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn rejects_past_timestamps() {
        let tool = ReminderTool::new(StubBackend::default());
        let yesterday = (Utc::now() - Duration::days(1)).to_rfc3339();
        let outcome = tool
            .execute(json!({"action": "set_reminder", "message": "x", "remind_at": yesterday}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("past"));
    }

    #[tokio::test]
    async fn cancel_requires_known_id() {
        let tool = ReminderTool::new(StubBackend::default());
        let outcome = tool
            .execute(json!({"action": "cancel_reminder", "id": "zzz"}))
            .await;
        assert!(!outcome.success);
    }
}
