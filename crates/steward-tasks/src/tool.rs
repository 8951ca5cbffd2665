//! `steward_task` tool — lets the conversation loop hand long-running goals
//! to the background runner instead of grinding through them inline.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use steward_agent::tools::{Tool, ToolOutcome};

use crate::queue::TaskQueue;
use crate::types::TaskStatus;

pub struct TaskTool {
    queue: Arc<TaskQueue>,
}

impl TaskTool {
    pub fn new(queue: Arc<TaskQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl Tool for TaskTool {
    fn name(&self) -> &str {
        "steward_task"
    }

    fn description(&self) -> &str {
        "Queue a multi-step goal for background execution (research, comparisons, \
         long write-ups). The runner decomposes it, works through the steps, and \
         notifies the user with a full report when done. Actions: enqueue, status, cancel."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["enqueue", "status", "cancel"],
                    "description": "Operation to perform."
                },
                "goal": {
                    "type": "string",
                    "description": "The goal to pursue. Required for enqueue."
                },
                "task_id": {
                    "type": "string",
                    "description": "Task id. Required for status and cancel."
                }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, input: Value) -> ToolOutcome {
        match input.get("action").and_then(Value::as_str) {
            Some("enqueue") => {
                let Some(goal) = input.get("goal").and_then(Value::as_str).filter(|g| !g.is_empty())
                else {
                    return ToolOutcome::failure("'goal' is required for enqueue");
                };
                let task = self.queue.enqueue(goal, None, true);
                ToolOutcome::success(format!(
                    "Task {} queued. The user will get a report when it finishes.",
                    task.id
                ))
            }
            Some("status") => {
                let Some(id) = input.get("task_id").and_then(Value::as_str) else {
                    return ToolOutcome::failure("'task_id' is required for status");
                };
                match self.queue.get(id) {
                    Some(task) => ToolOutcome::success(format!(
                        "Task {}: {:?} ({} subtasks)",
                        task.id,
                        task.status,
                        task.subtasks.len()
                    )),
                    None => ToolOutcome::failure(format!("no task with id {id}")),
                }
            }
            Some("cancel") => {
                let Some(id) = input.get("task_id").and_then(Value::as_str) else {
                    return ToolOutcome::failure("'task_id' is required for cancel");
                };
                match self.queue.get(id) {
                    Some(task) if task.status == TaskStatus::Done => {
                        ToolOutcome::failure("task already finished")
                    }
                    Some(_) => match self.queue.cancel(id) {
                        Ok(()) => ToolOutcome::success(format!("Task {id} cancelled.")),
                        Err(e) => ToolOutcome::failure(e.to_string()),
                    },
                    None => ToolOutcome::failure(format!("no task with id {id}")),
                }
            }
            Some(other) => ToolOutcome::failure(format!("unknown action '{other}'")),
            None => ToolOutcome::failure("missing required field 'action'"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enqueue_and_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(TaskQueue::load(dir.path().join("task_queue.json")));
        let tool = TaskTool::new(queue.clone());

        let outcome = tool
            .execute(json!({"action": "enqueue", "goal": "summarize the week"}))
            .await;
        assert!(outcome.success);
        assert_eq!(queue.pending_count(), 1);

        let id = queue.all()[0].id.clone();
        let outcome = tool.execute(json!({"action": "cancel", "task_id": id})).await;
        assert!(outcome.success);
        assert_eq!(queue.pending_count(), 0);
    }
}
