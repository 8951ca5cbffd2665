//! Shared application state and router assembly.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use steward_agent::ConversationManager;
use steward_channels::allow::AllowList;
use steward_core::config::StewardConfig;
use steward_memory::Brain;
use steward_nervous::DeadLetterQueue;
use steward_scheduler::ReminderStore;
use steward_tasks::TaskQueue;

use crate::http;
use crate::notify::QueueNotifier;

/// Central shared state, passed as `Arc<AppState>` to every handler.
pub struct AppState {
    pub config: StewardConfig,
    pub manager: Arc<ConversationManager>,
    pub notifier: Arc<QueueNotifier>,
    pub allow: AllowList,
    pub brain: Arc<Brain>,
    pub reminders: Arc<ReminderStore>,
    pub tasks: Arc<TaskQueue>,
    pub dlq: Arc<DeadLetterQueue>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(http::health))
        .route("/webhooks/{channel}", post(http::webhook))
        .route("/notifications", get(http::notifications))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}
