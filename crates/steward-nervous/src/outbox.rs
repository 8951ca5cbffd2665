//! Durable outbox — prevents double-send of irreversible side-effects.
//!
//! The intent is recorded BEFORE execution and marked sent after. On retry
//! or restart, a key already in `sent` short-circuits the call. Keys are
//! content-addressed: hash(tool, operation, sorted args), with no wall-clock
//! or random bits, so the same request always maps to the same key.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use steward_core::statefile;
use tracing::{debug, info, warn};

/// Entries older than this are garbage-collected (non-pending only).
const GC_AFTER_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub status: OutboxStatus,
    pub tool: String,
    pub operation: String,
    /// Args summary for inspection; values truncated to 100 chars.
    pub args_summary: HashMap<String, String>,
    pub recorded_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Result of the original execution, replayed on duplicate calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

pub struct Outbox {
    path: PathBuf,
    entries: Mutex<HashMap<String, OutboxEntry>>,
}

impl Outbox {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = statefile::load_or_default(&path);
        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    fn save(&self, entries: &HashMap<String, OutboxEntry>) {
        if let Err(e) = statefile::save_atomic(&self.path, entries) {
            warn!(path = %self.path.display(), error = %e, "outbox save failed");
        }
    }

    /// Content-addressed idempotency key: first 16 hex chars of SHA-256 over
    /// the canonical JSON of {args, op, tool} with sorted keys.
    pub fn idempotency_key(tool: &str, operation: &str, args: &Value) -> String {
        let canonical = canonical_json(&serde_json::json!({
            "args": args,
            "op": operation,
            "tool": tool,
        }));
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(&digest[..8])
    }

    /// Record the intent before execution.
    pub fn record_pending(&self, key: &str, tool: &str, operation: &str, args: &Value) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            OutboxEntry {
                status: OutboxStatus::Pending,
                tool: tool.to_string(),
                operation: operation.to_string(),
                args_summary: summarize_args(args),
                recorded_at: chrono::Utc::now().to_rfc3339(),
                sent_at: None,
                error: None,
                result: None,
            },
        );
        self.save(&entries);
    }

    pub fn mark_sent(&self, key: &str, result: Option<&str>) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.status = OutboxStatus::Sent;
            entry.sent_at = Some(chrono::Utc::now().to_rfc3339());
            entry.result = result.map(|r| r.chars().take(500).collect());
            self.save(&entries);
        }
    }

    pub fn mark_failed(&self, key: &str, error: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.get_mut(key) {
            entry.status = OutboxStatus::Failed;
            entry.error = Some(error.chars().take(300).collect());
            self.save(&entries);
        }
    }

    /// True when this side-effect already went out; duplicates must be
    /// short-circuited, returning the stored result instead.
    pub fn is_duplicate(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap();
        let dup = entries
            .get(key)
            .map(|e| e.status == OutboxStatus::Sent)
            .unwrap_or(false);
        if dup {
            debug!(key, "outbox hit: side-effect already sent, skipping");
        }
        dup
    }

    pub fn stored_result(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).and_then(|e| e.result.clone())
    }

    pub fn get(&self, key: &str) -> Option<OutboxEntry> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Manually clear one key, re-arming the side-effect. The only way a
    /// sent entry becomes executable again.
    pub fn clear_key(&self, key: &str) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let removed = entries.remove(key).is_some();
        if removed {
            info!(key, "outbox entry cleared manually");
            self.save(&entries);
        }
        removed
    }

    /// Drop non-pending entries older than 7 days. Pending entries are kept:
    /// an unconfirmed attempt must stay visible forever.
    pub fn cleanup_old(&self) {
        let cutoff = (chrono::Utc::now() - chrono::Duration::days(GC_AFTER_DAYS)).to_rfc3339();
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| e.status == OutboxStatus::Pending || e.recorded_at > cutoff);
        if entries.len() != before {
            info!(removed = before - entries.len(), "outbox GC");
            self.save(&entries);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Deterministic JSON rendering with object keys sorted at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body = keys
                .iter()
                .map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonical_json(&map[*k])))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}

fn summarize_args(args: &Value) -> HashMap<String, String> {
    let Value::Object(map) = args else {
        return HashMap::new();
    };
    map.iter()
        .map(|(k, v)| {
            let s = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), s.chars().take(100).collect())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn outbox(dir: &std::path::Path) -> Outbox {
        Outbox::load(dir.join("outbox.json"))
    }

    #[test]
    fn key_is_stable_across_arg_order() {
        let a = Outbox::idempotency_key("email", "send_email", &json!({"to": "x", "body": "y"}));
        let b = Outbox::idempotency_key("email", "send_email", &json!({"body": "y", "to": "x"}));
        assert_eq!(a, b);

        let c = Outbox::idempotency_key("email", "send_email", &json!({"to": "x", "body": "z"}));
        assert_ne!(a, c);
    }

    #[test]
    fn sent_key_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = outbox(dir.path());
        let key = Outbox::idempotency_key("x_tool", "post_tweet", &json!({"text": "hi"}));

        outbox.record_pending(&key, "x_tool", "post_tweet", &json!({"text": "hi"}));
        assert!(!outbox.is_duplicate(&key));

        outbox.mark_sent(&key, Some("https://x.com/status/1"));
        assert!(outbox.is_duplicate(&key));
        assert_eq!(
            outbox.stored_result(&key).as_deref(),
            Some("https://x.com/status/1")
        );

        // Same (tool, op, args) recomputes the same key: still a duplicate.
        let again = Outbox::idempotency_key("x_tool", "post_tweet", &json!({"text": "hi"}));
        assert!(outbox.is_duplicate(&again));
    }

    #[test]
    fn failed_entries_are_not_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = outbox(dir.path());
        outbox.record_pending("k1", "email", "send_email", &json!({}));
        outbox.mark_failed("k1", "smtp timeout");
        assert!(!outbox.is_duplicate("k1"));
        assert_eq!(outbox.get("k1").unwrap().status, OutboxStatus::Failed);
    }

    #[test]
    fn manual_clear_rearms_the_key() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = outbox(dir.path());
        outbox.record_pending("k", "x_tool", "post_tweet", &json!({}));
        outbox.mark_sent("k", None);
        assert!(outbox.is_duplicate("k"));

        assert!(outbox.clear_key("k"));
        assert!(!outbox.is_duplicate("k"));
        assert!(!outbox.clear_key("k"), "second clear finds nothing");
    }

    #[test]
    fn dedup_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let outbox = outbox(dir.path());
            outbox.record_pending("k", "email", "send_email", &json!({}));
            outbox.mark_sent("k", None);
        }
        let outbox = outbox(dir.path());
        assert!(outbox.is_duplicate("k"));
    }

    #[test]
    fn gc_keeps_pending_and_recent() {
        let dir = tempfile::tempdir().unwrap();
        let outbox = outbox(dir.path());
        outbox.record_pending("old-sent", "email", "send_email", &json!({}));
        outbox.mark_sent("old-sent", None);
        outbox.record_pending("old-pending", "email", "send_email", &json!({}));
        outbox.record_pending("fresh", "email", "send_email", &json!({}));
        outbox.mark_sent("fresh", None);

        {
            let mut entries = outbox.entries.lock().unwrap();
            let stale = (chrono::Utc::now() - chrono::Duration::days(8)).to_rfc3339();
            entries.get_mut("old-sent").unwrap().recorded_at = stale.clone();
            entries.get_mut("old-pending").unwrap().recorded_at = stale;
        }

        outbox.cleanup_old();
        assert!(outbox.get("old-sent").is_none());
        assert!(outbox.get("old-pending").is_some());
        assert!(outbox.get("fresh").is_some());
    }
}
