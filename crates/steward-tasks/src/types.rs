use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Pending,
    Running,
    Done,
    Failed,
    ReDelegated,
}

/// Which model tier a subtask should run on: `light` for mechanical steps,
/// `heavy` for synthesis and judgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepTier {
    Light,
    #[default]
    Heavy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    pub description: String,
    #[serde(default)]
    pub tool_hints: Vec<String>,
    #[serde(default)]
    pub tier: StepTier,
    #[serde(default)]
    pub verification_criteria: String,
    /// False marks a step whose effects cannot be undone; the runner warns
    /// the user and waits a grace window before running it.
    #[serde(default = "bool_true")]
    pub reversible: bool,
    #[serde(default = "default_subtask_status")]
    pub status: SubtaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn bool_true() -> bool {
    true
}
fn default_subtask_status() -> SubtaskStatus {
    SubtaskStatus::Pending
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default = "bool_true")]
    pub notify_on_complete: bool,
    pub created_at: String,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Critic output for a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriticVerdict {
    pub score: f64,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refinement_hint: Option<String>,
}

/// One line of the per-task delegation audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub subtask_index: usize,
    pub description: String,
    pub attempts: u32,
    pub re_delegated: bool,
    pub success: bool,
    pub outcome: String,
    pub finished_at: String,
}

/// Stored decomposition reusable for similar future goals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub goal: String,
    pub subtasks: Vec<Subtask>,
    pub score: f64,
    pub stored_at: String,
}
