//! The layered brain: three collective stores shared across every transport
//! (identity, preferences, contacts), an episode log for the autonomous
//! plane, and one lazily-created isolated store per channel.
//!
//! Isolation invariant: no operation returns records from any store other
//! than the collective ones plus the single store matching the resolved
//! channel. Channel searches are routed by `ChannelTag`, so crossing would
//! require going out of your way.

use std::path::Path;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use steward_core::types::ChannelTag;

use crate::backup::{BackupLog, BackupRecord};
use crate::embed::Embedder;
use crate::error::Result;
use crate::store::VectorStore;
use crate::types::{ConversationTurn, DriftReport, Episode, PreferenceSource, SearchHit};

const COLLECTION_IDENTITY: &str = "identity";
const COLLECTION_PREFERENCES: &str = "preferences";
const COLLECTION_CONTACTS: &str = "contacts";
const COLLECTION_EPISODES: &str = "episodes";

/// Drift flag threshold: more than half of recent turns on fallback models.
const DRIFT_THRESHOLD: f64 = 0.5;

pub struct Brain {
    conn: Arc<Mutex<Connection>>,
    embedder: Arc<dyn Embedder>,
    identity: VectorStore,
    preferences: VectorStore,
    contacts: VectorStore,
    episodes: VectorStore,
    channels: DashMap<ChannelTag, VectorStore>,
    backup: BackupLog,
}

impl Brain {
    /// Open the brain database under `data_dir` and restore the collective
    /// collections from the backup log if any of them is empty.
    pub async fn open(data_dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let conn = Arc::new(Mutex::new(Connection::open(data_dir.join("brain.db"))?));

        let identity = VectorStore::open(Arc::clone(&conn), COLLECTION_IDENTITY, Arc::clone(&embedder))?;
        let preferences =
            VectorStore::open(Arc::clone(&conn), COLLECTION_PREFERENCES, Arc::clone(&embedder))?;
        let contacts =
            VectorStore::open(Arc::clone(&conn), COLLECTION_CONTACTS, Arc::clone(&embedder))?;
        let episodes =
            VectorStore::open(Arc::clone(&conn), COLLECTION_EPISODES, Arc::clone(&embedder))?;

        let brain = Self {
            conn,
            embedder,
            identity,
            preferences,
            contacts,
            episodes,
            channels: DashMap::new(),
            backup: BackupLog::new(data_dir.join("brain_backup.jsonl")),
        };

        if brain.identity.count() == 0
            || brain.preferences.count() == 0
            || brain.contacts.count() == 0
        {
            brain.restore_from_backup().await;
        }

        Ok(brain)
    }

    // ── Collective writes (backed up) ────────────────────────────────────

    /// Store an identity aspect. Aspects are unique by slug, so re-recording
    /// the same aspect replaces it.
    pub async fn record_identity(&self, aspect: &str, description: &str) -> Result<String> {
        let doc_id = format!("identity_{}", slug(aspect));
        let text = format!("{aspect}: {description}");
        let metadata = json!({
            "type": "identity",
            "aspect": aspect,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        self.identity.store(&text, metadata.clone(), Some(&doc_id)).await?;
        self.append_backup(COLLECTION_IDENTITY, &doc_id, &text, metadata);
        Ok(doc_id)
    }

    /// Preferences are append-only; repeated observations accumulate.
    pub async fn record_preference(
        &self,
        category: &str,
        text: &str,
        source: PreferenceSource,
        confidence: f64,
    ) -> Result<String> {
        let body = format!("Preference in {category}: {text}");
        let metadata = json!({
            "type": "preference",
            "category": category,
            "source": source.as_str(),
            "confidence": confidence.clamp(0.0, 1.0),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        let id = self.preferences.store(&body, metadata.clone(), None).await?;
        self.append_backup(COLLECTION_PREFERENCES, &id, &body, metadata);
        Ok(id)
    }

    /// Contacts are unique by normalized name.
    pub async fn record_contact(
        &self,
        name: &str,
        relationship: &str,
        attributes: Value,
    ) -> Result<String> {
        let doc_id = format!("contact_{}", slug(name));
        let text = format!("{name}: {relationship}. Details: {attributes}");
        let mut metadata = json!({
            "type": "contact",
            "name": name,
            "relationship": relationship,
        });
        if let (Value::Object(meta), Value::Object(attrs)) = (&mut metadata, &attributes) {
            for (k, v) in attrs {
                meta.entry(k.clone()).or_insert(v.clone());
            }
        }
        self.contacts.store(&text, metadata.clone(), Some(&doc_id)).await?;
        self.append_backup(COLLECTION_CONTACTS, &doc_id, &text, metadata);
        Ok(doc_id)
    }

    // ── Conversation turns (per-channel, isolated) ───────────────────────

    pub async fn store_turn(&self, turn: &ConversationTurn) -> Result<String> {
        let store = self.channel_store(turn.channel)?;
        let text = format!("User: {}\nAssistant: {}", turn.user_msg, turn.assistant_msg);
        let metadata = json!({
            "type": "conversation",
            "channel": turn.channel.as_str(),
            "timestamp": turn.timestamp,
            "model_id": turn.model_id,
            "tools": turn.tool_invocations.join(","),
        });
        store.store(&text, metadata, None).await
    }

    /// Search one channel's isolated store. Never touches any other channel.
    pub async fn search_channel(
        &self,
        channel: ChannelTag,
        query: &str,
        top_k: usize,
    ) -> Vec<SearchHit> {
        match self.channel_store(channel) {
            Ok(store) => store.search(query, top_k, None, None).await,
            Err(e) => {
                debug!(channel = %channel, error = %e, "channel store unavailable");
                Vec::new()
            }
        }
    }

    /// Assemble the turn context: identity, preferences, contacts, then the
    /// resolved channel's recent semantic matches, with labeled headers.
    /// Without a channel the "general" store serves section four.
    pub async fn get_relevant_context(
        &self,
        query: &str,
        channel: Option<ChannelTag>,
        channel_k: usize,
    ) -> String {
        let tag = channel.unwrap_or(ChannelTag::General);
        let mut sections: Vec<String> = Vec::new();

        push_section(
            &mut sections,
            "Identity",
            &self.identity.search(query, 3, None, None).await,
        );
        push_section(
            &mut sections,
            "Preferences",
            &self.preferences.search(query, 3, None, None).await,
        );
        push_section(
            &mut sections,
            "Contacts",
            &self.contacts.search(query, 2, None, None).await,
        );
        push_section(
            &mut sections,
            &format!("Recent context ({tag})"),
            &self.search_channel(tag, query, channel_k).await,
        );

        sections.join("\n")
    }

    /// Fraction of the last `window` turns on a channel served by
    /// fallback/local models. Flagged above 0.5.
    pub fn drift_report(
        &self,
        channel: ChannelTag,
        window: usize,
        is_fallback: impl Fn(&str) -> bool,
    ) -> DriftReport {
        let filter = json!({"type": "conversation"});
        let turns = match self.channel_store(channel) {
            Ok(store) => store.recent(Some(&filter), window),
            Err(_) => Vec::new(),
        };
        let sampled = turns.len();
        let fallback = turns
            .iter()
            .filter(|hit| {
                hit.metadata
                    .get("model_id")
                    .and_then(Value::as_str)
                    .map(&is_fallback)
                    .unwrap_or(false)
            })
            .count();
        let fraction = if sampled == 0 {
            0.0
        } else {
            fallback as f64 / sampled as f64
        };
        DriftReport {
            channel,
            window,
            sampled,
            fallback_fraction: fraction,
            flagged: fraction > DRIFT_THRESHOLD,
        }
    }

    /// Delete conversation turns older than `cutoff` from one channel store.
    /// Examines at most `max` recent turns per call; idempotent.
    pub fn prune_turns_older_than(
        &self,
        channel: ChannelTag,
        cutoff: chrono::DateTime<chrono::Utc>,
        max: usize,
    ) -> usize {
        let store = match self.channel_store(channel) {
            Ok(s) => s,
            Err(_) => return 0,
        };
        let filter = json!({"type": "conversation"});
        let cutoff_str = cutoff.to_rfc3339();
        let mut pruned = 0;
        for hit in store.recent(Some(&filter), max) {
            let Some(ts) = hit.metadata.get("timestamp").and_then(Value::as_str) else {
                continue;
            };
            if ts < cutoff_str.as_str() && store.delete(&hit.id).is_ok() {
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!(channel = %channel, pruned, "pruned old conversation turns");
        }
        pruned
    }

    // ── Episodes ─────────────────────────────────────────────────────────

    pub async fn record_episode(&self, episode: &Episode) -> Result<String> {
        let text = format!("{} -> {}", episode.action, episode.outcome);
        let metadata = serde_json::to_value(episode)?;
        let metadata = merge_type(metadata, "episode");
        self.episodes.store(&text, metadata, None).await
    }

    /// Most-recent episodes by insertion order (no similarity query).
    pub fn recent_episodes(&self, limit: usize) -> Vec<Episode> {
        let filter = json!({"type": "episode"});
        self.episodes
            .recent(Some(&filter), limit)
            .into_iter()
            .filter_map(|hit| serde_json::from_value(hit.metadata).ok())
            .collect()
    }

    /// Success rate per tool over the last `window` episodes.
    /// Returned as (tool, success_rate, samples), most-used first.
    pub fn tool_success_rates(&self, window: usize) -> Vec<(String, f64, usize)> {
        let mut counts: std::collections::HashMap<String, (usize, usize)> =
            std::collections::HashMap::new();
        for ep in self.recent_episodes(window) {
            let entry = counts.entry(ep.tool_used).or_insert((0, 0));
            entry.1 += 1;
            if ep.success {
                entry.0 += 1;
            }
        }
        let mut rates: Vec<(String, f64, usize)> = counts
            .into_iter()
            .map(|(tool, (ok, total))| (tool, ok as f64 / total as f64, total))
            .collect();
        rates.sort_by(|a, b| b.2.cmp(&a.2));
        rates
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn identity_store(&self) -> &VectorStore {
        &self.identity
    }

    pub fn preferences_store(&self) -> &VectorStore {
        &self.preferences
    }

    pub fn contacts_store(&self) -> &VectorStore {
        &self.contacts
    }

    /// Lazily open the isolated store for a channel.
    pub fn channel_store(&self, tag: ChannelTag) -> Result<VectorStore> {
        if let Some(store) = self.channels.get(&tag) {
            return Ok(store.clone());
        }
        let store = VectorStore::open(
            Arc::clone(&self.conn),
            &format!("channel_{tag}"),
            Arc::clone(&self.embedder),
        )?;
        self.channels.insert(tag, store.clone());
        Ok(store)
    }

    // ── Backup plumbing ──────────────────────────────────────────────────

    fn append_backup(&self, collection: &str, id: &str, text: &str, metadata: Value) {
        let record = BackupRecord {
            collection: collection.to_string(),
            id: id.to_string(),
            text: text.to_string(),
            metadata,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.backup.append(&record) {
            warn!(error = %e, "backup append failed");
        }
    }

    async fn restore_from_backup(&self) {
        let records = self.backup.replay();
        if records.is_empty() {
            return;
        }
        info!(count = records.len(), "restoring collective memory from backup");

        let mut restored = 0usize;
        for rec in records {
            let store = match rec.collection.as_str() {
                COLLECTION_IDENTITY => &self.identity,
                COLLECTION_PREFERENCES => &self.preferences,
                COLLECTION_CONTACTS => &self.contacts,
                other => {
                    warn!(collection = %other, "unknown collection in backup, skipping");
                    continue;
                }
            };
            match store.store(&rec.text, rec.metadata, Some(&rec.id)).await {
                Ok(_) => restored += 1,
                Err(e) => warn!(id = %rec.id, error = %e, "backup restore failed for record"),
            }
        }
        info!(restored, "backup restore complete");
    }
}

fn push_section(sections: &mut Vec<String>, label: &str, hits: &[SearchHit]) {
    if hits.is_empty() {
        return;
    }
    let mut out = format!("## {label}\n");
    for hit in hits {
        let text = hit.text.chars().take(200).collect::<String>();
        out.push_str(&format!("- {text}\n"));
    }
    sections.push(out);
}

fn merge_type(mut metadata: Value, kind: &str) -> Value {
    if let Value::Object(ref mut map) = metadata {
        map.insert("type".into(), Value::String(kind.into()));
    }
    metadata
}

fn slug(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    async fn test_brain(dir: &Path) -> Brain {
        Brain::open(dir, Arc::new(HashEmbedder::default())).await.unwrap()
    }

    fn turn(channel: ChannelTag, user: &str, model: &str) -> ConversationTurn {
        ConversationTurn {
            user_msg: user.into(),
            assistant_msg: "done".into(),
            channel,
            timestamp: chrono::Utc::now().to_rfc3339(),
            model_id: model.into(),
            tool_invocations: vec![],
        }
    }

    #[tokio::test]
    async fn channel_isolation_holds() {
        let dir = tempfile::tempdir().unwrap();
        let brain = test_brain(dir.path()).await;

        brain
            .store_turn(&turn(
                ChannelTag::Email,
                "my passport renewal appointment is on friday",
                "m",
            ))
            .await
            .unwrap();

        let x_hits = brain
            .search_channel(ChannelTag::X, "passport renewal appointment", 10)
            .await;
        assert!(x_hits.is_empty());

        let email_hits = brain
            .search_channel(ChannelTag::Email, "passport renewal appointment", 10)
            .await;
        assert_eq!(email_hits.len(), 1);
    }

    #[tokio::test]
    async fn context_assembly_labels_sections() {
        let dir = tempfile::tempdir().unwrap();
        let brain = test_brain(dir.path()).await;

        brain
            .record_identity("role", "chief of staff for the principal")
            .await
            .unwrap();
        brain
            .record_preference("food", "no cilantro ever", PreferenceSource::UserStated, 0.9)
            .await
            .unwrap();
        brain
            .store_turn(&turn(ChannelTag::Telegram, "book lunch for tuesday", "m"))
            .await
            .unwrap();

        let ctx = brain
            .get_relevant_context("lunch preferences", Some(ChannelTag::Telegram), 5)
            .await;
        assert!(ctx.contains("## Identity"));
        assert!(ctx.contains("## Preferences"));
        assert!(ctx.contains("## Recent context (telegram)"));
        assert!(!ctx.contains("(email)"));
    }

    #[tokio::test]
    async fn backup_restore_rebuilds_collectives() {
        let dir = tempfile::tempdir().unwrap();
        {
            let brain = test_brain(dir.path()).await;
            brain.record_identity("name", "the agent").await.unwrap();
            brain
                .record_preference("style", "concise", PreferenceSource::System, 1.0)
                .await
                .unwrap();
            brain
                .record_contact("Ada Lovelace", "mentor", json!({"city": "London"}))
                .await
                .unwrap();
        }

        // Wipe the database but keep the backup log, then reboot.
        std::fs::remove_file(dir.path().join("brain.db")).unwrap();
        let brain = test_brain(dir.path()).await;

        assert_eq!(brain.identity_store().count(), 1);
        assert_eq!(brain.preferences_store().count(), 1);
        assert_eq!(brain.contacts_store().count(), 1);
    }

    #[tokio::test]
    async fn restore_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        {
            let brain = test_brain(dir.path()).await;
            brain.record_identity("name", "the agent").await.unwrap();
        }
        // Two reboots with an intact backup must not duplicate records.
        std::fs::remove_file(dir.path().join("brain.db")).unwrap();
        {
            let _ = test_brain(dir.path()).await;
        }
        std::fs::remove_file(dir.path().join("brain.db")).unwrap();
        let brain = test_brain(dir.path()).await;
        assert_eq!(brain.identity_store().count(), 1);
    }

    #[tokio::test]
    async fn identity_aspects_are_unique_by_slug() {
        let dir = tempfile::tempdir().unwrap();
        let brain = test_brain(dir.path()).await;
        brain.record_identity("role", "assistant").await.unwrap();
        brain.record_identity("role", "executive assistant").await.unwrap();
        assert_eq!(brain.identity_store().count(), 1);
    }

    #[tokio::test]
    async fn drift_report_counts_fallback_models() {
        let dir = tempfile::tempdir().unwrap();
        let brain = test_brain(dir.path()).await;
        for i in 0..4 {
            let model = if i < 3 { "local/llama3" } else { "claude-opus-4-6" };
            brain
                .store_turn(&turn(ChannelTag::Web, &format!("msg {i}"), model))
                .await
                .unwrap();
        }
        let report = brain.drift_report(ChannelTag::Web, 10, |m| m.starts_with("local/"));
        assert_eq!(report.sampled, 4);
        assert!(report.flagged);
        assert!((report.fallback_fraction - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn prune_removes_only_old_turns() {
        let dir = tempfile::tempdir().unwrap();
        let brain = test_brain(dir.path()).await;

        let old = ConversationTurn {
            timestamp: "2020-01-01T00:00:00+00:00".into(),
            ..turn(ChannelTag::Slack, "ancient history", "m")
        };
        brain.store_turn(&old).await.unwrap();
        brain
            .store_turn(&turn(ChannelTag::Slack, "fresh message", "m"))
            .await
            .unwrap();

        let cutoff = chrono::Utc::now() - chrono::Duration::days(30);
        let pruned = brain.prune_turns_older_than(ChannelTag::Slack, cutoff, 500);
        assert_eq!(pruned, 1);
        // Second pass finds nothing — pruning is idempotent.
        assert_eq!(brain.prune_turns_older_than(ChannelTag::Slack, cutoff, 500), 0);
    }

    #[tokio::test]
    async fn episodes_feed_success_rates() {
        let dir = tempfile::tempdir().unwrap();
        let brain = test_brain(dir.path()).await;
        for i in 0..4 {
            brain
                .record_episode(&Episode {
                    action: format!("step {i}"),
                    outcome: "ok".into(),
                    success: i % 2 == 0,
                    tool_used: "web_fetch".into(),
                    context: None,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                })
                .await
                .unwrap();
        }
        let rates = brain.tool_success_rates(50);
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[0].0, "web_fetch");
        assert!((rates[0].1 - 0.5).abs() < 1e-9);
        assert_eq!(rates[0].2, 4);
    }
}
