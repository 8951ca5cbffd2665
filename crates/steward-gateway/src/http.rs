//! HTTP surface: webhook ingress, health, and the notification drain.
//!
//! Webhooks acknowledge within the provider deadline: the payload is
//! validated and queued, actual processing runs on a spawned task. Replies
//! land on the notification queue for the transport daemons to deliver.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, warn};

use steward_channels::{Notifier, NotifyLevel};
use steward_core::types::ChannelTag;

use crate::app::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Reduced webhook payload every adapter posts: who said what.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    sender_id: String,
    text: String,
}

/// GET /healthz
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = state.manager.state_machine().status();
    let pending_reminders = state
        .reminders
        .list()
        .iter()
        .filter(|r| matches!(r.status, steward_scheduler::ReminderStatus::Pending))
        .count();
    Json(json!({
        "status": "ok",
        "agent_state": status.state,
        "pending_tasks": state.tasks.pending_count(),
        "pending_reminders": pending_reminders,
        "queued_notifications": state.notifier.len(),
        "dead_letters": state.dlq.count(),
        "memory": {
            "identity": state.brain.identity_store().count(),
            "preferences": state.brain.preferences_store().count(),
            "contacts": state.brain.contacts_store().count(),
        },
    }))
}

/// GET /notifications — drain queued outbound notifications.
pub async fn notifications(State(state): State<Arc<AppState>>) -> Json<Value> {
    let drained = state.notifier.drain();
    Json(json!({ "notifications": drained }))
}

/// POST /webhooks/{channel}
///
/// Returns quickly; the turn itself runs on a spawned task so the provider
/// gets its 200 within the webhook deadline.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    // Per-channel HMAC when a secret is configured.
    if let Some(secret) = state.config.channels.webhook_secrets.get(&channel) {
        verify_hmac(&headers, &body, secret).map_err(|e| {
            warn!(channel = %channel, error = %e, "webhook signature rejected");
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "signature verification failed"})),
            )
        })?;
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!(channel = %channel, error = %e, "invalid webhook body");
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "invalid JSON body"})),
        )
    })?;

    // Non-authorized senders are dropped silently: log a warning, answer
    // 200, tell them nothing.
    if !state.allow.is_allowed(&payload.sender_id) {
        return Ok(Json(json!({"ok": true})));
    }

    let tag = ChannelTag::resolve(&channel);
    let receipt_id = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
    info!(channel = %tag, receipt = %receipt_id, "webhook accepted");

    let state = Arc::clone(&state);
    let sender = payload.sender_id.clone();
    tokio::spawn(async move {
        let reply = state
            .manager
            .process_message(&payload.text, tag, &sender, None)
            .await;
        if !reply.is_empty() {
            state.notifier.notify(&reply, NotifyLevel::Info).await;
        }
    });

    Ok(Json(json!({"ok": true, "receipt_id": receipt_id})))
}

/// GitHub-style HMAC-SHA256 over the raw body: `sha256=<hex>` in
/// X-Hub-Signature-256.
fn verify_hmac(headers: &HeaderMap, body: &Bytes, secret: &str) -> Result<(), String> {
    let sig_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| "missing X-Hub-Signature-256 header".to_string())?;

    let sig_hex = sig_header
        .strip_prefix("sha256=")
        .ok_or_else(|| "malformed X-Hub-Signature-256 header".to_string())?;

    let expected = hex::decode(sig_hex).map_err(|_| "signature is not valid hex".to_string())?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| "invalid HMAC key length".to_string())?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| "HMAC signature mismatch".to_string())
}
