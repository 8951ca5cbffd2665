//! Memory consolidator — periodic pruning so conversation stores never grow
//! without bound. Runs every six hours after a 30-minute warmup, deletes
//! turns past the 30-day retention window from every channel store, and
//! never touches the collective collections.

use std::sync::Arc;
use std::time::Duration;

use steward_core::types::ChannelTag;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use steward_memory::Brain;

const INTERVAL: Duration = Duration::from_secs(6 * 3600);
const WARMUP: Duration = Duration::from_secs(30 * 60);
const RETENTION_DAYS: i64 = 30;
/// Turns examined per store per cycle.
const MAX_TURNS_PER_STORE: usize = 500;

pub struct MemoryConsolidator {
    brain: Arc<Brain>,
}

impl MemoryConsolidator {
    pub fn new(brain: Arc<Brain>) -> Self {
        Self { brain }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("memory consolidator started");
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(WARMUP) => {}
        }
        loop {
            match self.consolidate_once() {
                Ok(pruned) => info!(pruned, "consolidation complete"),
                Err(e) => error!(error = %e, "consolidation error"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("memory consolidator shutting down");
                    return;
                }
                _ = tokio::time::sleep(INTERVAL) => {}
            }
        }
    }

    /// One pruning pass over every channel store. Idempotent.
    pub fn consolidate_once(&self) -> Result<usize, String> {
        let cutoff = chrono::Utc::now() - chrono::Duration::days(RETENTION_DAYS);
        let mut total = 0;
        for tag in ChannelTag::ALL {
            total += self
                .brain
                .prune_turns_older_than(tag, cutoff, MAX_TURNS_PER_STORE);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_memory::embed::HashEmbedder;
    use steward_memory::types::ConversationTurn;

    #[tokio::test]
    async fn prunes_only_expired_turns_across_channels() {
        let dir = tempfile::tempdir().unwrap();
        let brain = Arc::new(
            Brain::open(dir.path(), Arc::new(HashEmbedder::default())).await.unwrap(),
        );

        let old = ConversationTurn {
            user_msg: "ancient".into(),
            assistant_msg: "reply".into(),
            channel: ChannelTag::Telegram,
            timestamp: "2020-01-01T00:00:00+00:00".into(),
            model_id: "m".into(),
            tool_invocations: vec![],
        };
        brain.store_turn(&old).await.unwrap();
        brain
            .store_turn(&ConversationTurn {
                channel: ChannelTag::Email,
                timestamp: chrono::Utc::now().to_rfc3339(),
                ..old.clone()
            })
            .await
            .unwrap();
        // Collective stores must survive untouched.
        brain.record_identity("role", "assistant").await.unwrap();

        let consolidator = MemoryConsolidator::new(brain.clone());
        assert_eq!(consolidator.consolidate_once().unwrap(), 1);
        assert_eq!(consolidator.consolidate_once().unwrap(), 0, "idempotent");
        assert_eq!(brain.identity_store().count(), 1);
    }
}
