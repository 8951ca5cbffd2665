//! Dead-letter queue — parks keys that fail repeatedly so nothing retries
//! forever. Three consecutive failures move the key into a 100-entry ring
//! buffer for later inspection; a success clears the counter.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use steward_core::statefile;
use tracing::{info, warn};

/// Consecutive failures before a key is dead-lettered.
const MAX_RETRIES: u32 = 3;
/// Ring buffer size; oldest entries are dropped.
const MAX_DLQ_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub key: String,
    pub error: String,
    #[serde(default)]
    pub context: Value,
    pub failure_count: u32,
    pub dead_lettered_at: String,
}

pub struct DeadLetterQueue {
    path: PathBuf,
    items: Mutex<Vec<DeadLetter>>,
    /// In-memory consecutive-failure counters; reset by success or
    /// dead-lettering. Not persisted: a restart grants a fresh allowance.
    failure_counts: Mutex<HashMap<String, u32>>,
}

impl DeadLetterQueue {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let items = statefile::load_or_default(&path);
        Self {
            path,
            items: Mutex::new(items),
            failure_counts: Mutex::new(HashMap::new()),
        }
    }

    fn save(&self, items: &Vec<DeadLetter>) {
        if let Err(e) = statefile::save_atomic(&self.path, items) {
            warn!(path = %self.path.display(), error = %e, "DLQ save failed");
        }
    }

    /// Record one failure for `key`. Returns true when the key was just
    /// dead-lettered (third strike) — the caller should stop retrying.
    pub fn record_failure(&self, key: &str, error: &str, context: Value) -> bool {
        let count = {
            let mut counts = self.failure_counts.lock().unwrap();
            let count = counts.entry(key.to_string()).or_insert(0);
            *count += 1;
            if *count >= MAX_RETRIES {
                counts.remove(key);
                MAX_RETRIES
            } else {
                return false;
            }
        };

        let mut items = self.items.lock().unwrap();
        items.push(DeadLetter {
            key: key.to_string(),
            error: error.chars().take(300).collect(),
            context,
            failure_count: count,
            dead_lettered_at: chrono::Utc::now().to_rfc3339(),
        });
        let len = items.len();
        if len > MAX_DLQ_SIZE {
            items.drain(..len - MAX_DLQ_SIZE);
        }
        self.save(&items);
        warn!(key, failures = count, "dead-lettered after repeated failures");
        true
    }

    /// Clears the consecutive-failure counter for a key.
    pub fn record_success(&self, key: &str) {
        self.failure_counts.lock().unwrap().remove(key);
    }

    /// Most recent dead letters, newest last.
    pub fn items(&self, limit: usize) -> Vec<DeadLetter> {
        let items = self.items.lock().unwrap();
        let start = items.len().saturating_sub(limit);
        items[start..].to_vec()
    }

    pub fn count(&self) -> usize {
        self.items.lock().unwrap().len()
    }

    pub fn clear(&self) {
        let mut items = self.items.lock().unwrap();
        items.clear();
        self.failure_counts.lock().unwrap().clear();
        self.save(&items);
        info!("dead letter queue cleared");
    }
}
