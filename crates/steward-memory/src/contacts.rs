//! Per-contact interaction history — who was talked to, when, and whether a
//! follow-up is owed. Feeds the attention engine's follow-up and
//! stale-contact observations.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use steward_core::statefile;
use tracing::warn;

const MAX_INTERACTIONS_PER_CONTACT: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interaction {
    pub channel: String,
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StaleContact {
    pub name: String,
    pub last_date: String,
}

pub struct ContactIntelligence {
    path: PathBuf,
    state: Mutex<BTreeMap<String, Vec<Interaction>>>,
}

impl ContactIntelligence {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = statefile::load_or_default(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn save(&self, state: &BTreeMap<String, Vec<Interaction>>) {
        if let Err(e) = statefile::save_atomic(&self.path, state) {
            warn!(path = %self.path.display(), error = %e, "contact history save failed");
        }
    }

    pub fn record_interaction(
        &self,
        name: &str,
        channel: &str,
        summary: &str,
        follow_up: Option<&str>,
    ) {
        let key = name.trim().to_lowercase();
        if key.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let entries = state.entry(key).or_default();
        entries.push(Interaction {
            channel: channel.to_string(),
            summary: summary.chars().take(200).collect(),
            follow_up: follow_up.map(|f| f.chars().take(120).collect()),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });
        let len = entries.len();
        if len > MAX_INTERACTIONS_PER_CONTACT {
            entries.drain(..len - MAX_INTERACTIONS_PER_CONTACT);
        }
        self.save(&state);
    }

    /// Recent history for one contact, formatted for prompt injection.
    pub fn contact_context(&self, name: &str) -> String {
        let state = self.state.lock().unwrap();
        let Some(entries) = state.get(&name.trim().to_lowercase()) else {
            return String::new();
        };
        let mut lines = vec![format!("Interaction history with {name}:")];
        for e in entries.iter().rev().take(3) {
            lines.push(format!("  - [{}] {}", e.channel, e.summary));
        }
        lines.join("\n")
    }

    /// All open follow-ups across contacts.
    pub fn followup_context(&self) -> String {
        let state = self.state.lock().unwrap();
        let mut lines = Vec::new();
        for (name, entries) in state.iter() {
            if let Some(follow_up) = entries.iter().rev().find_map(|e| e.follow_up.as_deref()) {
                lines.push(format!("  - {name}: {follow_up}"));
            }
        }
        if lines.is_empty() {
            String::new()
        } else {
            format!("Open follow-ups:\n{}", lines.join("\n"))
        }
    }

    /// Contacts whose last interaction is older than `days`.
    pub fn stale_contacts(&self, days: i64) -> Vec<StaleContact> {
        let state = self.state.lock().unwrap();
        let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
        let mut stale = Vec::new();
        for (name, entries) in state.iter() {
            let Some(last) = entries.last() else { continue };
            let Ok(dt) = chrono::DateTime::parse_from_rfc3339(&last.timestamp) else {
                continue;
            };
            if dt.with_timezone(&chrono::Utc) < cutoff {
                stale.push(StaleContact {
                    name: name.clone(),
                    last_date: dt.format("%Y-%m-%d").to_string(),
                });
            }
        }
        stale
    }
}
