//! Daily digest — one report per day at the configured local time:
//! activity counts parsed from the log file, capability backlog, dead
//! letters, and uptime. Polls every minute; a day is marked sent so the
//! digest can never double-fire.

use std::path::PathBuf;
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, Timelike};
use chrono_tz::Tz;
use regex::Regex;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use steward_channels::{Notifier, NotifyLevel};
use steward_nervous::DeadLetterQueue;

const POLL: Duration = Duration::from_secs(60);

static LOG_TS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}-\d{2}-\d{2})[T ](\d{2}:\d{2}:\d{2})").unwrap());

#[derive(Debug, Default, Clone)]
pub struct ActivityCounts {
    pub messages: usize,
    pub tasks_completed: usize,
    pub tool_calls: usize,
    pub task_errors: usize,
}

#[derive(Debug, Deserialize)]
struct BacklogItem {
    #[serde(default)]
    gap_description: String,
    #[serde(default)]
    status: String,
}

pub struct DailyDigest {
    notifier: Arc<dyn Notifier>,
    dlq: Arc<DeadLetterQueue>,
    log_file: PathBuf,
    data_dir: PathBuf,
    hour: u32,
    minute: u32,
    tz: Tz,
    started_at: chrono::DateTime<chrono::Utc>,
    last_sent: Mutex<Option<NaiveDate>>,
}

impl DailyDigest {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        dlq: Arc<DeadLetterQueue>,
        log_file: impl Into<PathBuf>,
        data_dir: impl Into<PathBuf>,
        digest_time: &str,
        tz: Tz,
    ) -> Self {
        let (hour, minute) = steward_core::timezone::parse_hhmm(digest_time).unwrap_or((9, 0));
        Self {
            notifier,
            dlq,
            log_file: log_file.into(),
            data_dir: data_dir.into(),
            hour,
            minute,
            tz,
            started_at: chrono::Utc::now(),
            last_sent: Mutex::new(None),
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!(hour = self.hour, minute = self.minute, "daily digest scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("daily digest shutting down");
                    return;
                }
                _ = tokio::time::sleep(POLL) => {
                    if let Err(e) = self.check_and_send().await {
                        error!(error = %e, "daily digest error");
                    }
                }
            }
        }
    }

    async fn check_and_send(&self) -> Result<(), String> {
        let now = steward_core::timezone::now_in(self.tz);
        let today = now.date_naive();

        if *self.last_sent.lock().unwrap() == Some(today) {
            return Ok(());
        }
        if now.hour() != self.hour || now.minute() < self.minute {
            return Ok(());
        }

        let report = self.generate_report(24);
        self.notifier.notify(&report, NotifyLevel::Info).await;
        *self.last_sent.lock().unwrap() = Some(today);
        info!("daily digest sent");
        Ok(())
    }

    /// Compose the report for the trailing `hours` window.
    pub fn generate_report(&self, hours: i64) -> String {
        let now = steward_core::timezone::now_in(self.tz);
        let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours);
        let counts = self.count_log_activity(cutoff.naive_utc());

        let mut lines = vec![
            format!("Daily report for {}", now.format("%b %d, %Y")),
            String::new(),
            format!("Messages handled: {}", counts.messages),
            format!("Tasks completed: {}", counts.tasks_completed),
            format!("Tool calls: {}", counts.tool_calls),
        ];
        if counts.task_errors > 0 {
            lines.push(format!("Task errors: {}", counts.task_errors));
        }

        if let Some(backlog) = self.backlog_summary() {
            lines.push(String::new());
            lines.push(backlog);
        }

        let dead = self.dlq.count();
        if dead > 0 {
            lines.push(String::new());
            lines.push(format!("Dead-lettered failures awaiting review: {dead}"));
        }

        lines.push(String::new());
        lines.push(format!("Uptime: {}", self.uptime()));
        lines.join("\n")
    }

    /// Count activity markers in the log since `cutoff`. Lines without a
    /// parseable timestamp are skipped.
    fn count_log_activity(&self, cutoff: chrono::NaiveDateTime) -> ActivityCounts {
        let mut counts = ActivityCounts::default();
        let Ok(content) = std::fs::read_to_string(&self.log_file) else {
            return counts;
        };

        for line in content.lines() {
            if let Some(caps) = LOG_TS.captures(line) {
                let stamp = format!("{} {}", &caps[1], &caps[2]);
                if let Ok(ts) = chrono::NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S") {
                    if ts < cutoff {
                        continue;
                    }
                }
            }

            if line.contains("intent") && line.contains("confidence") {
                counts.messages += 1;
            } else if line.contains("task completed") {
                counts.tasks_completed += 1;
            } else if line.contains("invoking tool") {
                counts.tool_calls += 1;
            } else if line.contains("task runner loop error") || line.contains("turn failed") {
                counts.task_errors += 1;
            }
        }
        counts
    }

    fn backlog_summary(&self) -> Option<String> {
        let path = self.data_dir.join("capability_backlog.json");
        let content = std::fs::read_to_string(path).ok()?;
        let backlog: Vec<BacklogItem> = match serde_json::from_str(&content) {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "unreadable capability backlog");
                return None;
            }
        };
        if backlog.is_empty() {
            return None;
        }

        let pending: Vec<&BacklogItem> = backlog.iter().filter(|i| i.status == "pending").collect();
        let fixed = backlog.iter().filter(|i| i.status == "fixed").count();
        let failed = backlog.iter().filter(|i| i.status == "failed").count();

        let mut parts = vec!["Capability backlog:".to_string()];
        if fixed > 0 {
            parts.push(format!("  learned: {fixed}"));
        }
        if !pending.is_empty() {
            parts.push(format!("  pending: {}", pending.len()));
            for item in pending.iter().take(3) {
                parts.push(format!("  - {}", item.gap_description));
            }
        }
        if failed > 0 {
            parts.push(format!("  failed: {failed}"));
        }
        (parts.len() > 1).then(|| parts.join("\n"))
    }

    fn uptime(&self) -> String {
        let delta = chrono::Utc::now().signed_duration_since(self.started_at);
        let hours = delta.num_hours();
        let minutes = delta.num_minutes() % 60;
        if hours >= 24 {
            format!("{}d {}h {}m", hours / 24, hours % 24, minutes)
        } else {
            format!("{hours}h {minutes}m")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    #[derive(Default)]
    struct NullNotifier;

    #[async_trait]
    impl Notifier for NullNotifier {
        async fn notify(&self, _text: &str, _level: NotifyLevel) {}
    }

    fn digest(dir: &std::path::Path, log: &str) -> DailyDigest {
        let log_file = dir.join("steward.log");
        std::fs::write(&log_file, log).unwrap();
        DailyDigest::new(
            Arc::new(NullNotifier),
            Arc::new(DeadLetterQueue::load(dir.join("dlq.json"))),
            log_file,
            dir,
            "09:00",
            chrono_tz::UTC,
        )
    }

    #[test]
    fn counts_activity_markers() {
        let now = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        let log = format!(
            "{now}Z INFO steward_agent::pipeline: intent action=chat confidence=0.9\n\
             {now}Z INFO steward_agent::tools: invoking tool tool=clock\n\
             {now}Z INFO steward_agent::tools: invoking tool tool=web_fetch\n\
             {now}Z INFO steward_tasks::runner: task completed task=abc\n\
             2020-01-01T00:00:00Z INFO steward_agent::tools: invoking tool tool=old\n"
        );
        let dir = tempfile::tempdir().unwrap();
        let d = digest(dir.path(), &log);

        let cutoff = (chrono::Utc::now() - chrono::Duration::hours(24)).naive_utc();
        let counts = d.count_log_activity(cutoff);
        assert_eq!(counts.messages, 1);
        assert_eq!(counts.tool_calls, 2, "stale lines fall outside the window");
        assert_eq!(counts.tasks_completed, 1);
    }

    #[test]
    fn report_includes_backlog_and_uptime() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("capability_backlog.json"),
            r#"[{"gap_description": "cannot read spreadsheets", "status": "pending"},
                {"gap_description": "learned pdf parsing", "status": "fixed"}]"#,
        )
        .unwrap();
        let d = digest(dir.path(), "");
        let report = d.generate_report(24);
        assert!(report.contains("Messages handled: 0"));
        assert!(report.contains("cannot read spreadsheets"));
        assert!(report.contains("Uptime: 0h 0m"));
    }

    #[test]
    fn missing_log_file_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let d = DailyDigest::new(
            Arc::new(NullNotifier),
            Arc::new(DeadLetterQueue::load(dir.path().join("dlq.json"))),
            dir.path().join("absent.log"),
            dir.path(),
            "not-a-time",
            chrono_tz::UTC,
        );
        // Malformed digest_time falls back to 09:00.
        assert_eq!(d.hour, 9);
        let counts = d.count_log_activity(chrono::Utc::now().naive_utc());
        assert_eq!(counts.messages, 0);
    }
}
