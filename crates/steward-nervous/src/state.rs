//! Agent state machine — tracks what the agent is doing and carries the
//! cooperative cancellation latch. Long operations poll `is_cancelled`
//! before each tool invocation and each subtask; an in-flight external call
//! is allowed to finish but its result is discarded.

use std::sync::Mutex;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    ParsingIntent,
    Thinking,
    Executing,
    Reflecting,
    Responding,
    AwaitingApproval,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::ParsingIntent => "parsing_intent",
            AgentState::Thinking => "thinking",
            AgentState::Executing => "executing",
            AgentState::Reflecting => "reflecting",
            AgentState::Responding => "responding",
            AgentState::AwaitingApproval => "awaiting_approval",
        }
    }
}

struct Inner {
    state: AgentState,
    changed_at: chrono::DateTime<chrono::Utc>,
    task_description: String,
}

pub struct AgentStateMachine {
    inner: Mutex<Inner>,
    cancel: Mutex<CancellationToken>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StateStatus {
    pub state: AgentState,
    pub task: String,
    pub since: String,
    pub cancelled: bool,
}

impl AgentStateMachine {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: AgentState::Idle,
                changed_at: chrono::Utc::now(),
                task_description: String::new(),
            }),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn state(&self) -> AgentState {
        self.inner.lock().unwrap().state
    }

    pub fn transition(&self, new_state: AgentState, task_description: &str) {
        let mut inner = self.inner.lock().unwrap();
        debug!(from = inner.state.as_str(), to = new_state.as_str(), "state transition");
        inner.state = new_state;
        inner.changed_at = chrono::Utc::now();
        if !task_description.is_empty() {
            inner.task_description = task_description.to_string();
        }
    }

    /// Set the cancel latch. A no-op while idle or already responding —
    /// there is nothing to abandon.
    pub fn request_cancel(&self) {
        let state = self.state();
        if !matches!(state, AgentState::Idle | AgentState::Responding) {
            info!(state = state.as_str(), "cancellation requested");
            self.cancel.lock().unwrap().cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.lock().unwrap().is_cancelled()
    }

    /// Token for tool adapters that opt into mid-call cancellation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().unwrap().clone()
    }

    /// Return to idle and clear the latch.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.state = AgentState::Idle;
        inner.changed_at = chrono::Utc::now();
        inner.task_description.clear();
        // A cancelled token cannot be un-cancelled; swap in a fresh one.
        *self.cancel.lock().unwrap() = CancellationToken::new();
    }

    pub fn status(&self) -> StateStatus {
        let inner = self.inner.lock().unwrap();
        StateStatus {
            state: inner.state,
            task: inner.task_description.clone(),
            since: inner.changed_at.to_rfc3339(),
            cancelled: self.is_cancelled(),
        }
    }
}

impl Default for AgentStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transitions_and_reset() {
        let sm = AgentStateMachine::new();
        assert_eq!(sm.state(), AgentState::Idle);

        sm.transition(AgentState::Thinking, "drafting a reply");
        assert_eq!(sm.state(), AgentState::Thinking);
        assert_eq!(sm.status().task, "drafting a reply");

        sm.reset();
        assert_eq!(sm.state(), AgentState::Idle);
        assert!(sm.status().task.is_empty());
    }

    #[test]
    fn cancel_only_latches_mid_run() {
        let sm = AgentStateMachine::new();
        sm.request_cancel();
        assert!(!sm.is_cancelled(), "idle cancel is a no-op");

        sm.transition(AgentState::Executing, "");
        sm.request_cancel();
        assert!(sm.is_cancelled());

        sm.reset();
        assert!(!sm.is_cancelled(), "reset clears the latch");
    }
}
