//! Persistent task queue. Strictly FIFO: `dequeue_next` hands out the
//! oldest pending task and flips it to running. Setting a task to `failed`
//! from outside is the cancellation signal the runner polls between
//! subtasks.

use std::path::PathBuf;
use std::sync::Mutex;

use steward_core::statefile;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{Result, TaskError};
use crate::types::{Subtask, SubtaskStatus, Task, TaskStatus};

pub struct TaskQueue {
    path: PathBuf,
    tasks: Mutex<Vec<Task>>,
}

impl TaskQueue {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tasks: Vec<Task> = statefile::load_or_default(&path);
        // A crash mid-run leaves a task stuck in running; requeue it.
        for task in tasks.iter_mut() {
            if task.status == TaskStatus::Running {
                warn!(task = %task.id, "requeueing task left running by a previous process");
                task.status = TaskStatus::Pending;
            }
        }
        Self {
            path,
            tasks: Mutex::new(tasks),
        }
    }

    fn save(&self, tasks: &Vec<Task>) {
        if let Err(e) = statefile::save_atomic(&self.path, tasks) {
            warn!(path = %self.path.display(), error = %e, "task queue save failed");
        }
    }

    pub fn enqueue(&self, goal: &str, user_id: Option<&str>, notify_on_complete: bool) -> Task {
        let task = Task {
            id: Uuid::new_v4().to_string(),
            goal: goal.to_string(),
            status: TaskStatus::Pending,
            user_id: user_id.map(String::from),
            notify_on_complete,
            created_at: chrono::Utc::now().to_rfc3339(),
            subtasks: Vec::new(),
            result: None,
            error: None,
        };
        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(task.clone());
        self.save(&tasks);
        info!(task = %task.id, goal = %truncate(goal, 60), "task enqueued");
        task
    }

    /// Oldest pending task, flipped to running. `None` when the queue is idle.
    pub fn dequeue_next(&self) -> Option<Task> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.status == TaskStatus::Pending)?;
        task.status = TaskStatus::Running;
        let snapshot = task.clone();
        self.save(&tasks);
        Some(snapshot)
    }

    pub fn get(&self, id: &str) -> Option<Task> {
        self.tasks.lock().unwrap().iter().find(|t| t.id == id).cloned()
    }

    pub fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.get(id).map(|t| t.status)
    }

    pub fn set_subtasks(&self, id: &str, subtasks: Vec<Subtask>) -> Result<()> {
        self.mutate(id, |task| task.subtasks = subtasks)
    }

    pub fn update_subtask(
        &self,
        id: &str,
        index: usize,
        status: SubtaskStatus,
        result: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        self.mutate(id, |task| {
            if let Some(subtask) = task.subtasks.get_mut(index) {
                subtask.status = status;
                if let Some(r) = result {
                    subtask.result = Some(truncate(r, 500));
                }
                if let Some(e) = error {
                    subtask.error = Some(truncate(e, 300));
                }
            }
        })
    }

    pub fn mark_done(&self, id: &str, result: &str) -> Result<()> {
        self.mutate(id, |task| {
            task.status = TaskStatus::Done;
            task.result = Some(result.to_string());
        })
    }

    pub fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        self.mutate(id, |task| {
            task.status = TaskStatus::Failed;
            task.error = Some(truncate(error, 300));
        })
    }

    /// External cancellation: flips the task to failed. The runner checks
    /// status before each subtask and stops the run.
    pub fn cancel(&self, id: &str) -> Result<()> {
        self.mark_failed(id, "cancelled by user")
    }

    pub fn pending_count(&self) -> usize {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .count()
    }

    pub fn all(&self) -> Vec<Task> {
        self.tasks.lock().unwrap().clone()
    }

    fn mutate(&self, id: &str, f: impl FnOnce(&mut Task)) -> Result<()> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        f(task);
        self.save(&tasks);
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(dir: &std::path::Path) -> TaskQueue {
        TaskQueue::load(dir.join("task_queue.json"))
    }

    #[test]
    fn fifo_order() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());
        let first = q.enqueue("first goal", None, true);
        let _second = q.enqueue("second goal", None, true);

        let next = q.dequeue_next().unwrap();
        assert_eq!(next.id, first.id);
        assert_eq!(q.status_of(&first.id), Some(TaskStatus::Running));

        let next = q.dequeue_next().unwrap();
        assert_eq!(next.goal, "second goal");
        assert!(q.dequeue_next().is_none());
    }

    #[test]
    fn cancellation_is_visible_to_the_runner() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());
        let task = q.enqueue("long research", None, true);
        q.dequeue_next().unwrap();
        q.cancel(&task.id).unwrap();
        assert_eq!(q.status_of(&task.id), Some(TaskStatus::Failed));
    }

    #[test]
    fn running_tasks_requeue_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let q = queue(dir.path());
            let task = q.enqueue("goal", None, true);
            q.dequeue_next().unwrap();
            task.id
        };
        let q = queue(dir.path());
        assert_eq!(q.status_of(&id), Some(TaskStatus::Pending));
        assert_eq!(q.pending_count(), 1);
    }

    #[test]
    fn unknown_id_errors() {
        let dir = tempfile::tempdir().unwrap();
        let q = queue(dir.path());
        assert!(matches!(q.mark_done("nope", "r"), Err(TaskError::NotFound(_))));
    }
}
