//! Pattern detector — finds recurring time-and-tool patterns in the episode
//! log. Groups episodes by tool, day of week, and hour bucket, then asks a
//! small model for human-readable patterns with a deterministic rule-based
//! fallback. Results are cached to patterns.json for the attention engine.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};
use steward_core::statefile;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use steward_agent::router::{ModelRouter, ModelTier};
use steward_memory::types::Episode;
use steward_memory::Brain;

/// Scan cadence.
const SCAN_INTERVAL: Duration = Duration::from_secs(12 * 3600);
/// Startup warmup before the first scan.
const WARMUP: Duration = Duration::from_secs(60);
/// Episodes examined per scan.
const MAX_EPISODES: usize = 500;
/// Minimum occurrences per tool before it can become a pattern.
const MIN_OCCURRENCES: usize = 3;
/// Stored pattern cap.
const MAX_PATTERNS: usize = 20;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub description: String,
    /// "daily" | "weekly" | "irregular"
    #[serde(default = "default_frequency")]
    pub frequency: String,
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day_of_week: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    pub detected_at: String,
}

fn default_frequency() -> String {
    "irregular".into()
}
fn default_confidence() -> f64 {
    0.7
}

pub struct PatternDetector {
    brain: Arc<Brain>,
    router: Option<Arc<ModelRouter>>,
    path: PathBuf,
}

impl PatternDetector {
    pub fn new(brain: Arc<Brain>, router: Option<Arc<ModelRouter>>, path: impl Into<PathBuf>) -> Self {
        Self {
            brain,
            router,
            path: path.into(),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("pattern detector started (12h scan cycle)");
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(WARMUP) => {}
        }
        loop {
            match self.scan().await {
                Ok(patterns) if !patterns.is_empty() => {
                    info!(count = patterns.len(), "pattern scan complete")
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "pattern scan error"),
            }
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("pattern detector shutting down");
                    return;
                }
                _ = tokio::time::sleep(SCAN_INTERVAL) => {}
            }
        }
    }

    /// One-shot scan: pull episodes, build the frequency summary, extract
    /// patterns, cache them.
    pub async fn scan(&self) -> Result<Vec<Pattern>, String> {
        let episodes = self.brain.recent_episodes(MAX_EPISODES);
        if episodes.len() < MIN_OCCURRENCES {
            debug!(count = episodes.len(), "not enough episodes for pattern detection");
            return Ok(Vec::new());
        }

        let summary = frequency_summary(&episodes);
        if summary.is_empty() {
            return Ok(Vec::new());
        }

        let patterns = match self.router {
            Some(ref router) => match extract_with_llm(router, &summary).await {
                Some(p) => p,
                None => extract_rule_based(&summary),
            },
            None => extract_rule_based(&summary),
        };

        if !patterns.is_empty() {
            statefile::save_atomic(&self.path, &patterns).map_err(|e| e.to_string())?;
        }
        Ok(patterns)
    }

    pub fn load(&self) -> Vec<Pattern> {
        statefile::load_or_default(&self.path)
    }

    /// Formatted patterns for prompt injection; empty when nothing useful.
    pub fn context(&self) -> String {
        let patterns = self.load();
        let lines: Vec<String> = patterns
            .iter()
            .take(10)
            .filter(|p| p.confidence >= 0.6 && !p.description.is_empty())
            .map(|p| {
                if p.frequency != "irregular" {
                    format!("  - {} ({})", p.description, p.frequency)
                } else {
                    format!("  - {}", p.description)
                }
            })
            .collect();
        if lines.is_empty() {
            String::new()
        } else {
            format!("DETECTED PATTERNS (from past activity):\n{}", lines.join("\n"))
        }
    }
}

/// Bucket an hour of day.
fn hour_bucket(hour: u32) -> &'static str {
    match hour {
        6..=9 => "morning",
        10..=13 => "midday",
        14..=17 => "afternoon",
        18..=21 => "evening",
        _ => "night",
    }
}

/// Compact per-tool frequency summary over days and hour buckets.
fn frequency_summary(episodes: &[Episode]) -> String {
    let mut tool_day: HashMap<&str, HashMap<String, usize>> = HashMap::new();
    let mut tool_hour: HashMap<&str, HashMap<&'static str, usize>> = HashMap::new();
    let mut tool_total: HashMap<&str, usize> = HashMap::new();
    let mut tool_last: HashMap<&str, String> = HashMap::new();

    for ep in episodes {
        if ep.tool_used.is_empty() || ep.tool_used == "none" {
            continue;
        }
        let Ok(dt) = DateTime::parse_from_rfc3339(&ep.timestamp) else {
            continue;
        };
        let day = dt.weekday().to_string();
        let bucket = hour_bucket(dt.hour());

        *tool_day.entry(&ep.tool_used).or_default().entry(day).or_insert(0) += 1;
        *tool_hour.entry(&ep.tool_used).or_default().entry(bucket).or_insert(0) += 1;
        *tool_total.entry(&ep.tool_used).or_insert(0) += 1;
        let last = tool_last.entry(&ep.tool_used).or_default();
        if ep.timestamp > *last {
            *last = ep.timestamp.clone();
        }
    }

    let mut tools: Vec<&&str> = tool_total.keys().collect();
    tools.sort();

    let mut lines = Vec::new();
    for tool in tools {
        let total = tool_total[*tool];
        if total < MIN_OCCURRENCES {
            continue;
        }
        let mut days: Vec<(String, usize)> = tool_day[*tool]
            .iter()
            .filter(|(_, c)| **c >= 2)
            .map(|(d, c)| (d.clone(), *c))
            .collect();
        days.sort_by(|a, b| b.1.cmp(&a.1));
        let day_dist = days
            .iter()
            .map(|(d, c)| format!("{d}:{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut hours: Vec<(&str, usize)> = tool_hour[*tool]
            .iter()
            .filter(|(_, c)| **c >= 2)
            .map(|(b, c)| (*b, *c))
            .collect();
        hours.sort_by(|a, b| b.1.cmp(&a.1));
        let hour_dist = hours
            .iter()
            .map(|(b, c)| format!("{b}:{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        let last: String = tool_last[*tool].chars().take(10).collect();
        lines.push(format!(
            "- {tool} (total={total}): days=[{day_dist}] times=[{hour_dist}] last={last}"
        ));
    }
    lines.join("\n")
}

async fn extract_with_llm(router: &ModelRouter, summary: &str) -> Option<Vec<Pattern>> {
    let system = "You are a behavioral pattern analyzer. Output only valid JSON arrays.";
    let prompt = format!(
        "Analyze this activity data and extract recurring patterns.\n\
         Return ONLY a JSON array. Each pattern:\n\
         {{\"description\": \"...\", \"frequency\": \"daily|weekly|irregular\", \
         \"day_of_week\": \"Monday\", \"tool\": \"...\", \"confidence\": 0.0-1.0}}\n\
         day_of_week may be omitted. Only include patterns with confidence >= 0.6. Max 10.\n\n\
         Activity data:\n{}",
        truncate(summary, 800)
    );

    let text = router.complete(ModelTier::Chat, system, &prompt, 400).await.ok()?;
    let cleaned = text.replace("```json", "").replace("```", "");
    let raw: Vec<serde_json::Value> = serde_json::from_str(cleaned.trim()).ok()?;

    let now = chrono::Utc::now().to_rfc3339();
    let patterns: Vec<Pattern> = raw
        .into_iter()
        .take(MAX_PATTERNS)
        .filter_map(|mut v| {
            v.as_object_mut()?
                .insert("detected_at".into(), serde_json::Value::String(now.clone()));
            serde_json::from_value::<Pattern>(v).ok()
        })
        .filter(|p| !p.description.is_empty())
        .collect();

    if patterns.is_empty() {
        None
    } else {
        Some(patterns)
    }
}

/// Deterministic fallback: any tool above the occurrence floor becomes a
/// pattern whose confidence grows with volume.
fn extract_rule_based(summary: &str) -> Vec<Pattern> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut patterns = Vec::new();

    for line in summary.lines() {
        let Some(rest) = line.strip_prefix("- ") else { continue };
        let Some((tool, tail)) = rest.split_once(" (total=") else { continue };
        let Some(total_str) = tail.split(')').next() else { continue };
        let Ok(total) = total_str.parse::<usize>() else { continue };

        if total >= MIN_OCCURRENCES {
            patterns.push(Pattern {
                description: format!("Uses {tool} regularly ({total} times recorded)"),
                frequency: "irregular".into(),
                tool: tool.trim().to_string(),
                day_of_week: None,
                confidence: (0.5 + total as f64 / 20.0).min(0.9),
                detected_at: now.clone(),
            });
        }
    }
    patterns.truncate(MAX_PATTERNS);
    patterns
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use steward_memory::embed::HashEmbedder;

    fn episode(tool: &str, timestamp: &str) -> Episode {
        Episode {
            action: "did a thing".into(),
            outcome: "ok".into(),
            success: true,
            tool_used: tool.into(),
            context: None,
            timestamp: timestamp.into(),
        }
    }

    #[test]
    fn summary_requires_three_occurrences() {
        let episodes = vec![
            episode("web_fetch", "2026-07-27T08:10:00+00:00"),
            episode("web_fetch", "2026-07-28T08:15:00+00:00"),
            episode("web_fetch", "2026-07-29T08:20:00+00:00"),
            episode("shell", "2026-07-29T20:00:00+00:00"),
        ];
        let summary = frequency_summary(&episodes);
        assert!(summary.contains("web_fetch (total=3)"));
        assert!(summary.contains("morning:3"));
        assert!(!summary.contains("shell"));
    }

    #[test]
    fn rule_based_extraction_and_confidence() {
        let summary = "- web_fetch (total=10): days=[Mon:5] times=[morning:8] last=2026-07-29";
        let patterns = extract_rule_based(summary);
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].tool, "web_fetch");
        // 0.5 + 10/20 caps at 0.9.
        assert!((patterns[0].confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn hour_buckets() {
        assert_eq!(hour_bucket(7), "morning");
        assert_eq!(hour_bucket(12), "midday");
        assert_eq!(hour_bucket(15), "afternoon");
        assert_eq!(hour_bucket(20), "evening");
        assert_eq!(hour_bucket(23), "night");
        assert_eq!(hour_bucket(3), "night");
    }

    #[tokio::test]
    async fn scan_writes_patterns_json() {
        let dir = tempfile::tempdir().unwrap();
        let brain = Arc::new(
            Brain::open(dir.path(), Arc::new(HashEmbedder::default())).await.unwrap(),
        );
        for i in 0..4 {
            brain
                .record_episode(&episode(
                    "web_fetch",
                    &format!("2026-07-2{i}T08:10:00+00:00"),
                ))
                .await
                .unwrap();
        }

        let detector = PatternDetector::new(brain, None, dir.path().join("patterns.json"));
        let patterns = detector.scan().await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert!(dir.path().join("patterns.json").exists());
        assert!(detector.context().contains("web_fetch"));
    }
}
