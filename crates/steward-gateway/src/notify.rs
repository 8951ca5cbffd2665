//! Queue-backed notifier. Outbound notifications land in per-level queues
//! drained by `GET /notifications`; external transport daemons poll the
//! queue and deliver through their own provider APIs. Chunks at the
//! Telegram limit and never fails.

use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use steward_channels::{chunk_text, Notifier, NotifyLevel, CHUNK_LIMIT};

/// Undelivered notifications kept before the oldest are dropped.
const MAX_QUEUED: usize = 500;

#[derive(Debug, Clone, Serialize)]
pub struct QueuedNotification {
    pub text: String,
    pub level: NotifyLevel,
    pub queued_at: String,
}

#[derive(Default)]
pub struct QueueNotifier {
    queue: Mutex<Vec<QueuedNotification>>,
}

impl QueueNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<QueuedNotification> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Notifier for QueueNotifier {
    async fn notify(&self, text: &str, level: NotifyLevel) {
        let now = chrono::Utc::now().to_rfc3339();
        let mut queue = self.queue.lock().unwrap();
        for chunk in chunk_text(text, CHUNK_LIMIT) {
            queue.push(QueuedNotification {
                text: chunk,
                level,
                queued_at: now.clone(),
            });
        }
        let len = queue.len();
        if len > MAX_QUEUED {
            queue.drain(..len - MAX_QUEUED);
        }
        info!(level = level.as_str(), queued = queue.len(), "notification queued");
    }
}
