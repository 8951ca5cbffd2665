//! Working memory — session state that survives restarts: detected tone,
//! behavioral calibration, unfinished items, open threads, recent
//! corrections, a structured preference profile, and the pending-action
//! queue that backs the irreversible-action confirmation loop.
//!
//! Single document on disk, rewritten atomically after every mutation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use steward_core::statefile;

const MAX_UNFINISHED: usize = 5;
const MAX_THREADS: usize = 3;
const THREAD_EXPIRY_HOURS: i64 = 48;
const MAX_CORRECTIONS: usize = 3;
const CORRECTION_TTL_HOURS: i64 = 24;
const MAX_CATEGORIES: usize = 10;
const MAX_PREFS_PER_CATEGORY: usize = 5;
const MAX_PENDING_ACTIONS: usize = 3;
/// Pending actions silently expire after 30 minutes.
const PENDING_ACTION_TTL_SECS: i64 = 1800;
/// Calibration directives are capped at 200 chars.
const MAX_CALIBRATION_LEN: usize = 200;

/// Detected emotional register of the principal's latest message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Neutral,
    Urgent,
    Stressed,
    Relaxed,
    Formal,
}

impl Tone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Neutral => "neutral",
            Tone::Urgent => "urgent",
            Tone::Stressed => "stressed",
            Tone::Relaxed => "relaxed",
            Tone::Formal => "formal",
        }
    }

    /// System-prompt instruction for this register; empty for neutral.
    pub fn instruction(&self) -> &'static str {
        match self {
            Tone::Urgent => "The user is in a hurry. Be brief, skip preamble, lead with the answer.",
            Tone::Stressed => "The user seems under pressure. Be calm, clear, and reassuring.",
            Tone::Relaxed => "The user is relaxed. You can be more conversational and thorough.",
            Tone::Formal => "The user is in professional mode. Be precise and structured.",
            Tone::Neutral => "",
        }
    }
}

/// A drafted irreversible tool call awaiting user confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingAction {
    pub tool_name: String,
    pub parameters: Value,
    pub label: String,
    pub proposal_text: String,
    /// Unix seconds at creation; drives the 30-minute TTL.
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenThread {
    pub topic: String,
    pub status: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub what: String,
    pub when: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimezoneOverride {
    pub tz: String,
    pub label: String,
    pub set_at: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WorkingState {
    #[serde(default)]
    tone: Tone,
    #[serde(default)]
    unfinished: Vec<String>,
    #[serde(default)]
    calibration: String,
    #[serde(default)]
    session_count: u64,
    #[serde(default)]
    last_active: Option<String>,
    #[serde(default)]
    timezone_override: Option<TimezoneOverride>,
    #[serde(default)]
    open_threads: Vec<OpenThread>,
    #[serde(default)]
    recent_corrections: Vec<Correction>,
    #[serde(default)]
    preference_profile: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pending_actions: Vec<PendingAction>,
}

pub struct WorkingMemory {
    path: PathBuf,
    state: Mutex<WorkingState>,
}

impl WorkingMemory {
    /// Load from disk; a missing or corrupt file starts from defaults.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = statefile::load_or_default(&path);
        Self {
            path,
            state: Mutex::new(state),
        }
    }

    fn save(&self, state: &WorkingState) {
        if let Err(e) = statefile::save_atomic(&self.path, state) {
            warn!(path = %self.path.display(), error = %e, "working memory save failed");
        }
    }

    // ── Per-turn update ──────────────────────────────────────────────────

    /// Called after each message pair: record tone, bump the session
    /// counter, and trim overgrown lists.
    pub fn update_after_turn(&self, detected_tone: Tone) {
        let mut state = self.state.lock().unwrap();
        state.tone = detected_tone;
        state.last_active = Some(chrono::Utc::now().to_rfc3339());
        state.session_count += 1;
        let len = state.unfinished.len();
        if len > MAX_UNFINISHED {
            state.unfinished.drain(..len - MAX_UNFINISHED);
        }
        self.save(&state);
    }

    pub fn tone(&self) -> Tone {
        self.state.lock().unwrap().tone
    }

    /// True when the gap since the last turn exceeds `gap_minutes`.
    pub fn is_new_session(&self, gap_minutes: i64) -> bool {
        let state = self.state.lock().unwrap();
        let Some(ref last) = state.last_active else {
            return true;
        };
        match chrono::DateTime::parse_from_rfc3339(last) {
            Ok(dt) => {
                let elapsed = chrono::Utc::now().signed_duration_since(dt);
                elapsed.num_minutes() > gap_minutes
            }
            Err(_) => true,
        }
    }

    // ── Unfinished items (LRU, max 5) ────────────────────────────────────

    pub fn add_unfinished(&self, item: &str) {
        let trimmed: String = item.trim().chars().take(100).collect();
        if trimmed.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if state.unfinished.contains(&trimmed) {
            return;
        }
        state.unfinished.push(trimmed);
        if state.unfinished.len() > MAX_UNFINISHED {
            state.unfinished.remove(0);
        }
        self.save(&state);
    }

    pub fn resolve_unfinished(&self, item: &str) {
        let needle = item.to_lowercase();
        let mut state = self.state.lock().unwrap();
        state.unfinished.retain(|x| !x.to_lowercase().contains(&needle));
        self.save(&state);
    }

    // ── Calibration directive ────────────────────────────────────────────

    pub fn set_calibration(&self, directive: &str) {
        let mut state = self.state.lock().unwrap();
        state.calibration = directive.trim().chars().take(MAX_CALIBRATION_LEN).collect();
        self.save(&state);
        info!(directive = %state.calibration, "calibration set");
    }

    pub fn clear_calibration(&self) {
        let mut state = self.state.lock().unwrap();
        state.calibration.clear();
        self.save(&state);
    }

    pub fn calibration(&self) -> String {
        self.state.lock().unwrap().calibration.clone()
    }

    // ── Timezone override ────────────────────────────────────────────────

    pub fn set_timezone_override(&self, tz: &str, label: &str) {
        let mut state = self.state.lock().unwrap();
        state.timezone_override = Some(TimezoneOverride {
            tz: tz.to_string(),
            label: label.to_string(),
            set_at: chrono::Utc::now().to_rfc3339(),
        });
        self.save(&state);
        info!(tz, label, "timezone override set");
    }

    pub fn clear_timezone_override(&self) {
        let mut state = self.state.lock().unwrap();
        state.timezone_override = None;
        self.save(&state);
    }

    pub fn timezone_override(&self) -> Option<TimezoneOverride> {
        self.state.lock().unwrap().timezone_override.clone()
    }

    // ── Open threads (cross-session continuity, max 3, 48 h expiry) ──────

    pub fn update_thread(&self, topic: &str, status: &str) {
        let topic: String = topic.trim().chars().take(80).collect();
        if topic.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        if let Some(existing) = state
            .open_threads
            .iter_mut()
            .find(|t| t.topic.eq_ignore_ascii_case(&topic))
        {
            existing.status = status.to_string();
            existing.updated_at = now;
        } else {
            state.open_threads.push(OpenThread {
                topic,
                status: status.to_string(),
                updated_at: now,
            });
            let len = state.open_threads.len();
            if len > MAX_THREADS {
                state.open_threads.drain(..len - MAX_THREADS);
            }
        }
        self.save(&state);
    }

    pub fn resolve_thread(&self, topic: &str) {
        let needle = topic.to_lowercase();
        let mut state = self.state.lock().unwrap();
        state
            .open_threads
            .retain(|t| !t.topic.to_lowercase().contains(&needle));
        self.save(&state);
    }

    /// Live threads, pruning anything idle past 48 hours.
    pub fn open_threads(&self) -> Vec<OpenThread> {
        let mut state = self.state.lock().unwrap();
        let before = state.open_threads.len();
        let now = chrono::Utc::now();
        state.open_threads.retain(|t| {
            chrono::DateTime::parse_from_rfc3339(&t.updated_at)
                .map(|dt| now.signed_duration_since(dt).num_hours() < THREAD_EXPIRY_HOURS)
                .unwrap_or(false)
        });
        if state.open_threads.len() != before {
            self.save(&state);
        }
        state.open_threads.clone()
    }

    // ── Recent corrections (max 3, 24 h expiry) ──────────────────────────

    pub fn add_correction(&self, correction: &str) {
        let mut state = self.state.lock().unwrap();
        state.recent_corrections.push(Correction {
            what: correction.trim().chars().take(100).collect(),
            when: chrono::Utc::now().to_rfc3339(),
        });
        let len = state.recent_corrections.len();
        if len > MAX_CORRECTIONS {
            state.recent_corrections.drain(..len - MAX_CORRECTIONS);
        }
        self.save(&state);
    }

    pub fn recent_corrections(&self) -> Vec<Correction> {
        let mut state = self.state.lock().unwrap();
        let before = state.recent_corrections.len();
        let now = chrono::Utc::now();
        state.recent_corrections.retain(|c| {
            chrono::DateTime::parse_from_rfc3339(&c.when)
                .map(|dt| now.signed_duration_since(dt).num_hours() < CORRECTION_TTL_HOURS)
                .unwrap_or(false)
        });
        if state.recent_corrections.len() != before {
            self.save(&state);
        }
        state.recent_corrections.clone()
    }

    // ── Preference profile (≤10 categories × ≤5 values) ──────────────────

    pub fn add_preference(&self, category: &str, preference: &str) {
        let category: String = category.trim().to_lowercase().chars().take(30).collect();
        let preference: String = preference.trim().chars().take(80).collect();
        if category.is_empty() || preference.is_empty() {
            return;
        }
        let mut state = self.state.lock().unwrap();
        if !state.preference_profile.contains_key(&category)
            && state.preference_profile.len() >= MAX_CATEGORIES
        {
            return;
        }
        let values = state.preference_profile.entry(category).or_default();
        if values.iter().any(|p| p.eq_ignore_ascii_case(&preference)) {
            return;
        }
        values.push(preference);
        let len = values.len();
        if len > MAX_PREFS_PER_CATEGORY {
            values.drain(..len - MAX_PREFS_PER_CATEGORY);
        }
        self.save(&state);
    }

    pub fn preference_summary(&self) -> String {
        let state = self.state.lock().unwrap();
        if state.preference_profile.is_empty() {
            return String::new();
        }
        let mut lines = vec!["OWNER PREFERENCES (learned from past conversations):".to_string()];
        for (category, prefs) in &state.preference_profile {
            if !prefs.is_empty() {
                lines.push(format!("  {}: {}", category, prefs.join(", ")));
            }
        }
        lines.join("\n")
    }

    // ── Pending actions (confirmation loop) ──────────────────────────────

    /// Stash a proposed irreversible action. At most one entry per tool
    /// (a newer draft replaces the older), at most 3 overall.
    pub fn add_pending_action(
        &self,
        tool_name: &str,
        parameters: Value,
        label: &str,
        proposal_text: &str,
    ) {
        let mut state = self.state.lock().unwrap();
        state.pending_actions.retain(|p| p.tool_name != tool_name);
        state.pending_actions.push(PendingAction {
            tool_name: tool_name.to_string(),
            parameters,
            label: label.trim().chars().take(80).collect(),
            proposal_text: proposal_text.trim().chars().take(500).collect(),
            created_at: chrono::Utc::now().timestamp(),
        });
        let len = state.pending_actions.len();
        if len > MAX_PENDING_ACTIONS {
            state.pending_actions.drain(..len - MAX_PENDING_ACTIONS);
        }
        self.save(&state);
        info!(tool = tool_name, "pending action stored");
    }

    /// Non-expired pending actions; stale entries are dropped on read.
    pub fn pending_actions(&self) -> Vec<PendingAction> {
        let mut state = self.state.lock().unwrap();
        let before = state.pending_actions.len();
        let now = chrono::Utc::now().timestamp();
        state
            .pending_actions
            .retain(|p| now - p.created_at < PENDING_ACTION_TTL_SECS);
        if state.pending_actions.len() != before {
            self.save(&state);
        }
        state.pending_actions.clone()
    }

    /// Remove and return a pending action: the named tool's entry, or the
    /// most recent when no tool is given.
    pub fn pop_pending_action(&self, tool_name: Option<&str>) -> Option<PendingAction> {
        let live = self.pending_actions();
        let matched = match tool_name {
            Some(tool) => live.iter().find(|p| p.tool_name == tool).cloned(),
            None => live.last().cloned(),
        }?;

        let mut state = self.state.lock().unwrap();
        state
            .pending_actions
            .retain(|p| p.tool_name != matched.tool_name || p.created_at != matched.created_at);
        self.save(&state);
        Some(matched)
    }

    /// Discard all pending actions (user said no).
    pub fn clear_pending_actions(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.pending_actions.is_empty() {
            state.pending_actions.clear();
            self.save(&state);
            info!("all pending actions cleared");
        }
    }

    // ── Context for the system prompt ────────────────────────────────────

    /// Formatted snippet for system-prompt injection; empty when there is
    /// nothing meaningful to add.
    pub fn get_context(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        let tone = self.tone();
        if !tone.instruction().is_empty() {
            parts.push(tone.instruction().to_string());
        }

        let calibration = self.calibration();
        if !calibration.is_empty() {
            parts.push(format!(
                "User instruction (active until changed): {calibration}"
            ));
        }

        if let Some(tz) = self.timezone_override() {
            parts.push(format!(
                "User is currently in {}; use the {} timezone for all times.",
                tz.label, tz.tz
            ));
        }

        let unfinished = self.state.lock().unwrap().unfinished.clone();
        if !unfinished.is_empty() {
            let items = unfinished
                .iter()
                .map(|u| format!("  - {u}"))
                .collect::<Vec<_>>()
                .join("\n");
            parts.push(format!("Items mentioned but not yet resolved:\n{items}"));
        }

        let corrections = self.recent_corrections();
        if !corrections.is_empty() {
            let items = corrections
                .iter()
                .rev()
                .take(2)
                .map(|c| c.what.clone())
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("Recent corrections from user: {items}"));
        }

        let threads = self.open_threads();
        if !threads.is_empty() {
            let items = threads
                .iter()
                .map(|t| format!("{} [{}]", t.topic, t.status))
                .collect::<Vec<_>>()
                .join(", ");
            parts.push(format!("Open threads from recent sessions: {items}"));
        }

        if parts.is_empty() {
            String::new()
        } else {
            format!("WORKING MEMORY:\n{}", parts.join("\n"))
        }
    }
}
