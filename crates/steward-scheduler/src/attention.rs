//! Attention engine — proactively notices things and surfaces at most three
//! short observations, every six hours during waking hours. The purpose
//! mode (what kind of noticing) follows the time of day. Observations are
//! sanitized and deduplicated: a topic goes out at most once per 24 hours.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{Datelike, Timelike};
use chrono_tz::Tz;
use regex::Regex;
use steward_core::statefile;
use steward_core::types::ChannelTag;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use steward_agent::router::{ModelRouter, ModelTier};
use steward_channels::{Notifier, NotifyLevel};
use steward_memory::contacts::ContactIntelligence;
use steward_memory::Brain;

use crate::patterns::PatternDetector;

/// Scan cadence.
const SCAN_INTERVAL: Duration = Duration::from_secs(6 * 3600);
/// Observations per cycle.
const MAX_ITEMS: usize = 3;
/// Observation length cap.
const MAX_OBS_LEN: usize = 280;
/// Dedup suppression window.
const DEDUP_HOURS: i64 = 24;
/// Dedup log cap; the oldest 20 entries go when it overflows.
const MAX_LOG_ENTRIES: usize = 100;

static MD_LINK: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]+\)").unwrap());
static RAW_URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());
static CAP_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b[A-Z][a-z]+\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurposeMode {
    MorningBriefing,
    MiddayCheck,
    EveningSummary,
    WeeklyLookAhead,
    CuriosityScan,
}

impl PurposeMode {
    /// Pick the mode from local time: Sunday evenings look ahead at the
    /// week, otherwise the hour decides.
    pub fn for_time(weekday: chrono::Weekday, hour: u32) -> PurposeMode {
        if weekday == chrono::Weekday::Sun && (16..=21).contains(&hour) {
            return PurposeMode::WeeklyLookAhead;
        }
        match hour {
            5..=10 => PurposeMode::MorningBriefing,
            11..=15 => PurposeMode::MiddayCheck,
            16..=21 => PurposeMode::EveningSummary,
            _ => PurposeMode::CuriosityScan,
        }
    }

    fn header(&self) -> &'static str {
        match self {
            PurposeMode::MorningBriefing => "Morning briefing:",
            PurposeMode::MiddayCheck => "Midday check-in:",
            PurposeMode::EveningSummary => "Evening summary:",
            PurposeMode::WeeklyLookAhead => "Looking at the week ahead:",
            PurposeMode::CuriosityScan => "Something I noticed:",
        }
    }

    fn instruction(&self) -> &'static str {
        match self {
            PurposeMode::MorningBriefing => {
                "What should the owner have on their radar this morning? Pending items first."
            }
            PurposeMode::MiddayCheck => {
                "Anything from this morning worth following up on before the day gets away?"
            }
            PurposeMode::EveningSummary => {
                "What's unresolved from today, and what deserves a look tomorrow?"
            }
            PurposeMode::WeeklyLookAhead => {
                "What recurring commitments or patterns matter for the coming week?"
            }
            PurposeMode::CuriosityScan => {
                "Anything unusual or interesting in recent activity worth mentioning?"
            }
        }
    }
}

pub struct AttentionEngine {
    brain: Arc<Brain>,
    contacts: Arc<ContactIntelligence>,
    patterns: Arc<PatternDetector>,
    router: Arc<ModelRouter>,
    notifier: Arc<dyn Notifier>,
    log_path: PathBuf,
    tz: Tz,
    owner_name: String,
}

impl AttentionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        brain: Arc<Brain>,
        contacts: Arc<ContactIntelligence>,
        patterns: Arc<PatternDetector>,
        router: Arc<ModelRouter>,
        notifier: Arc<dyn Notifier>,
        log_path: impl Into<PathBuf>,
        tz: Tz,
        owner_name: &str,
    ) -> Self {
        Self {
            brain,
            contacts,
            patterns,
            router,
            notifier,
            log_path: log_path.into(),
            tz,
            owner_name: owner_name.to_string(),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("attention engine started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("attention engine shutting down");
                    return;
                }
                _ = tokio::time::sleep(SCAN_INTERVAL) => {
                    if let Err(e) = self.scan_and_surface().await {
                        error!(error = %e, "attention scan error");
                    }
                }
            }
        }
    }

    /// One scan cycle at the current local time.
    pub async fn scan_and_surface(&self) -> Result<usize, String> {
        self.scan_at(steward_core::timezone::now_in(self.tz)).await
    }

    /// One scan cycle at an explicit local time.
    pub async fn scan_at(&self, now: chrono::DateTime<Tz>) -> Result<usize, String> {
        // Quiet outside waking hours.
        if !(7..=21).contains(&now.hour()) {
            debug!("outside waking hours, skipping attention scan");
            return Ok(0);
        }

        let mode = PurposeMode::for_time(now.weekday(), now.hour());
        info!(mode = ?mode, "attention scan running");

        let snippets = self.gather_snippets().await;
        if snippets.is_empty() {
            return Ok(0);
        }

        let observations = self.generate_observations(mode, &snippets).await;
        if observations.is_empty() {
            return Ok(0);
        }

        // Suppress anything already sent within 24 hours.
        let fresh: Vec<String> = observations
            .into_iter()
            .filter(|o| !self.already_sent(o))
            .collect();
        if fresh.is_empty() {
            return Ok(0);
        }

        let mut lines = vec![mode.header().to_string()];
        for obs in &fresh {
            lines.push(format!("  - {obs}"));
        }
        self.notifier.notify(&lines.join("\n"), NotifyLevel::Info).await;

        for obs in &fresh {
            self.mark_sent(obs);
        }
        info!(count = fresh.len(), "attention observations sent");
        Ok(fresh.len())
    }

    async fn gather_snippets(&self) -> String {
        let mut parts = Vec::new();

        let recent = self
            .brain
            .get_relevant_context(
                "recent conversations tasks reminders follow-up",
                Some(ChannelTag::Telegram),
                5,
            )
            .await;
        if !recent.is_empty() {
            parts.push(format!("Recent activity:\n{}", truncate(&recent, 800)));
        }

        let patterns = self.patterns.context();
        if !patterns.is_empty() {
            parts.push(patterns);
        }

        let followups = self.contacts.followup_context();
        if !followups.is_empty() {
            parts.push(followups);
        }
        let stale = self.contacts.stale_contacts(14);
        if !stale.is_empty() {
            let lines: Vec<String> = stale
                .iter()
                .take(3)
                .map(|s| format!("  - {}: last contacted {}", s.name, s.last_date))
                .collect();
            parts.push(format!("People not contacted recently:\n{}", lines.join("\n")));
        }

        parts.join("\n\n")
    }

    async fn generate_observations(&self, mode: PurposeMode, snippets: &str) -> Vec<String> {
        let system = "You surface short proactive observations for your owner. \
                      Output ONLY a JSON array of strings, max 3 items.";
        let prompt = format!(
            "{}\nOwner: {}\n\nMemory snippets:\n{}\n\n\
             Reply with a JSON array of at most {MAX_ITEMS} short observations. \
             No markdown, no links. If nothing is worth saying, reply [].",
            mode.instruction(),
            self.owner_name,
            truncate(snippets, 1500),
        );

        let text = match self.router.complete(ModelTier::Chat, system, &prompt, 256).await {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "attention model call failed");
                return Vec::new();
            }
        };

        let cleaned = text.replace("```json", "").replace("```", "");
        let Ok(raw) = serde_json::from_str::<Vec<String>>(cleaned.trim()) else {
            debug!("attention response was not a JSON array");
            return Vec::new();
        };

        let prompt_names = capitalized_words(&prompt);
        raw.into_iter()
            .filter(|o| !o.trim().is_empty())
            .take(MAX_ITEMS)
            .map(|o| sanitize_observation(&o, &prompt_names))
            .collect()
    }

    // ── Dedup log: {lowercase 50-char prefix → sent-at timestamp} ────────

    fn already_sent(&self, observation: &str) -> bool {
        let log: HashMap<String, String> = statefile::load_or_default(&self.log_path);
        let key = dedup_key(observation);
        let Some(sent_at) = log.get(&key) else {
            return false;
        };
        chrono::DateTime::parse_from_rfc3339(sent_at)
            .map(|dt| {
                chrono::Utc::now().signed_duration_since(dt).num_hours() < DEDUP_HOURS
            })
            .unwrap_or(false)
    }

    fn mark_sent(&self, observation: &str) {
        let mut log: HashMap<String, String> = statefile::load_or_default(&self.log_path);
        log.insert(dedup_key(observation), chrono::Utc::now().to_rfc3339());

        if log.len() > MAX_LOG_ENTRIES {
            let mut entries: Vec<(String, String)> = log.clone().into_iter().collect();
            entries.sort_by(|a, b| a.1.cmp(&b.1));
            for (key, _) in entries.into_iter().take(20) {
                log.remove(&key);
            }
        }

        if let Err(e) = statefile::save_atomic(&self.log_path, &log) {
            warn!(error = %e, "attention log save failed");
        }
    }
}

fn dedup_key(observation: &str) -> String {
    observation.to_lowercase().chars().take(50).collect()
}

/// Strip markdown links and raw URLs, cap length, and warn when the model
/// mentions names that never appeared in the prompt.
fn sanitize_observation(obs: &str, prompt_names: &std::collections::HashSet<String>) -> String {
    let clean = MD_LINK.replace_all(obs, "$1");
    let clean = RAW_URL.replace_all(&clean, "");
    let mut clean = clean.trim().to_string();
    if clean.chars().count() > MAX_OBS_LEN {
        clean = clean.chars().take(MAX_OBS_LEN - 1).collect::<String>() + "…";
    }

    let unknown: Vec<String> = capitalized_words(&clean)
        .difference(prompt_names)
        .cloned()
        .collect();
    if !unknown.is_empty() {
        warn!(names = ?unknown, "observation mentions names not present in the prompt");
    }
    clean
}

fn capitalized_words(text: &str) -> std::collections::HashSet<String> {
    const STOP: &[&str] = &[
        "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
        "January", "February", "March", "April", "May", "June", "July", "August",
        "September", "October", "November", "December", "Today", "Memory", "Reply",
        "Owner", "What", "Anything", "People", "Recent", "If", "No",
    ];
    CAP_WORD
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|w| !STOP.contains(&w.as_str()))
        .collect()
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purpose_mode_by_time() {
        use chrono::Weekday::*;
        assert_eq!(PurposeMode::for_time(Mon, 8), PurposeMode::MorningBriefing);
        assert_eq!(PurposeMode::for_time(Tue, 13), PurposeMode::MiddayCheck);
        assert_eq!(PurposeMode::for_time(Wed, 19), PurposeMode::EveningSummary);
        assert_eq!(PurposeMode::for_time(Sun, 19), PurposeMode::WeeklyLookAhead);
        assert_eq!(PurposeMode::for_time(Thu, 23), PurposeMode::CuriosityScan);
    }

    #[test]
    fn sanitizer_strips_links_and_caps_length() {
        let names = std::collections::HashSet::new();
        let obs = "Check [the report](https://example.com/x) and https://foo.bar/baz today";
        let clean = sanitize_observation(obs, &names);
        assert!(!clean.contains("http"));
        assert!(clean.contains("the report"));

        let long = "word ".repeat(100);
        let clean = sanitize_observation(&long, &names);
        assert!(clean.chars().count() <= MAX_OBS_LEN);
    }

    #[test]
    fn dedup_key_is_prefix_lowercase() {
        let a = dedup_key("Follow up with the accountant about Q3 filings before the deadline hits");
        assert!(a.len() <= 50);
        assert_eq!(a, a.to_lowercase());
    }

    mod engine {
        use super::super::*;
        use std::collections::VecDeque;
        use std::sync::Mutex;

        use async_trait::async_trait;
        use chrono::Timelike;
        use steward_agent::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};
        use steward_agent::router::TierModels;
        use steward_memory::embed::HashEmbedder;

        struct CannedProvider {
            responses: Mutex<VecDeque<String>>,
        }

        #[async_trait]
        impl LlmProvider for CannedProvider {
            fn name(&self) -> &str {
                "canned"
            }
            async fn send(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
                let text = self
                    .responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| "[]".to_string());
                Ok(ChatResponse {
                    content: text,
                    model: req.model.clone(),
                    tokens_in: 1,
                    tokens_out: 1,
                    stop_reason: "end_turn".into(),
                    tool_calls: vec![],
                })
            }
        }

        #[derive(Default)]
        struct RecordingNotifier {
            messages: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl Notifier for RecordingNotifier {
            async fn notify(&self, text: &str, _level: NotifyLevel) {
                self.messages.lock().unwrap().push(text.to_string());
            }
        }

        #[tokio::test]
        async fn identical_observations_dedup_within_24h() {
            let dir = tempfile::tempdir().unwrap();
            let brain = Arc::new(
                Brain::open(dir.path(), Arc::new(HashEmbedder::default())).await.unwrap(),
            );
            brain
                .record_identity("role", "keeps the owner's week on track")
                .await
                .unwrap();

            let obs = r#"["You still owe the accountant the Q3 numbers"]"#;
            let router = Arc::new(ModelRouter::new(
                TierModels {
                    default: "big".into(),
                    subagent: "mid".into(),
                    chat: "small".into(),
                    intent: "small".into(),
                },
                Arc::new(CannedProvider {
                    responses: Mutex::new(VecDeque::from([obs.to_string(), obs.to_string()])),
                }),
                None,
            ));
            let notifier = Arc::new(RecordingNotifier::default());
            let engine = AttentionEngine::new(
                brain.clone(),
                Arc::new(ContactIntelligence::load(dir.path().join("contacts.json"))),
                Arc::new(PatternDetector::new(brain, None, dir.path().join("patterns.json"))),
                router,
                notifier.clone(),
                dir.path().join("attention_log.json"),
                chrono_tz::UTC,
                "Owner",
            );

            let noon = chrono::Utc::now()
                .with_timezone(&chrono_tz::UTC)
                .with_hour(12)
                .unwrap();
            let first = engine.scan_at(noon).await.unwrap();
            assert_eq!(first, 1);
            let second = engine.scan_at(noon).await.unwrap();
            assert_eq!(second, 0, "second identical scan must send nothing");
            assert_eq!(notifier.messages.lock().unwrap().len(), 1);
        }

        #[tokio::test]
        async fn quiet_outside_waking_hours() {
            let dir = tempfile::tempdir().unwrap();
            let brain = Arc::new(
                Brain::open(dir.path(), Arc::new(HashEmbedder::default())).await.unwrap(),
            );
            let router = Arc::new(ModelRouter::new(
                TierModels {
                    default: "big".into(),
                    subagent: "mid".into(),
                    chat: "small".into(),
                    intent: "small".into(),
                },
                Arc::new(CannedProvider {
                    responses: Mutex::new(VecDeque::new()),
                }),
                None,
            ));
            let notifier = Arc::new(RecordingNotifier::default());
            let engine = AttentionEngine::new(
                brain.clone(),
                Arc::new(ContactIntelligence::load(dir.path().join("contacts.json"))),
                Arc::new(PatternDetector::new(brain, None, dir.path().join("patterns.json"))),
                router,
                notifier.clone(),
                dir.path().join("attention_log.json"),
                chrono_tz::UTC,
                "Owner",
            );

            let late = chrono::Utc::now()
                .with_timezone(&chrono_tz::UTC)
                .with_hour(3)
                .unwrap();
            assert_eq!(engine.scan_at(late).await.unwrap(), 0);
            assert!(notifier.messages.lock().unwrap().is_empty());
        }
    }
}
