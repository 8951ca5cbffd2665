//! Outbound notifier — the single publish interface used by every background
//! component (reminders, task runner, attention engine, digest, updater).
//!
//! Implementations chunk at provider limits and swallow delivery errors;
//! a notifier must never propagate a failure into a background loop.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Telegram hard limit per message; other providers are chunked at the same
/// size for simplicity.
pub const CHUNK_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl NotifyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotifyLevel::Info => "info",
            NotifyLevel::Warning => "warning",
            NotifyLevel::Error => "error",
            NotifyLevel::Success => "success",
        }
    }
}

/// Fire-and-forget notification sink. Infallible by contract: delivery
/// problems are logged inside the implementation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, text: &str, level: NotifyLevel);
}

/// Split text into chunks of at most `limit` characters, preferring to break
/// at a newline when one falls in the final quarter of the chunk.
pub fn chunk_text(text: &str, limit: usize) -> Vec<String> {
    if text.len() <= limit {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while !rest.is_empty() {
        if rest.len() <= limit {
            chunks.push(rest.to_string());
            break;
        }
        // Find a char boundary at or below the limit.
        let mut cut = limit;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let window = &rest[..cut];
        let split = match window.rfind('\n') {
            Some(pos) if pos >= limit * 3 / 4 => pos + 1,
            _ => cut,
        };
        chunks.push(rest[..split].to_string());
        rest = &rest[split..];
    }
    chunks
}
