//! Reminder store and firing loop.
//!
//! Fire-at-most-once: the `pending → fired` transition is persisted BEFORE
//! delivery is attempted. A failed delivery reverts the reminder to pending
//! for the next tick, bounded by the DLQ (three failed deliveries park it
//! as fired-undelivered).

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use steward_core::statefile;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use steward_nervous::DeadLetterQueue;

use crate::error::{Result, SchedulerError};

/// Loop cadence.
const TICK: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderStatus {
    Pending,
    Fired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reminder {
    /// 8-char id, shown to the user for cancellation.
    pub id: String,
    pub message: String,
    /// RFC3339 with offset; comparisons happen in UTC.
    pub remind_at: String,
    pub created_at: String,
    pub status: ReminderStatus,
}

pub struct ReminderStore {
    path: PathBuf,
    reminders: Mutex<Vec<Reminder>>,
}

impl ReminderStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let reminders = statefile::load_or_default(&path);
        Self {
            path,
            reminders: Mutex::new(reminders),
        }
    }

    fn save(&self, reminders: &Vec<Reminder>) {
        if let Err(e) = statefile::save_atomic(&self.path, reminders) {
            warn!(path = %self.path.display(), error = %e, "reminder store save failed");
        }
    }

    pub fn add(&self, message: &str, remind_at: DateTime<Utc>) -> Reminder {
        let reminder = Reminder {
            id: Uuid::new_v4().simple().to_string()[..8].to_string(),
            message: message.to_string(),
            remind_at: remind_at.to_rfc3339(),
            created_at: Utc::now().to_rfc3339(),
            status: ReminderStatus::Pending,
        };
        let mut reminders = self.reminders.lock().unwrap();
        reminders.push(reminder.clone());
        self.save(&reminders);
        info!(id = %reminder.id, at = %reminder.remind_at, "reminder added");
        reminder
    }

    pub fn list(&self) -> Vec<Reminder> {
        self.reminders.lock().unwrap().clone()
    }

    pub fn cancel(&self, id: &str) -> Result<()> {
        let mut reminders = self.reminders.lock().unwrap();
        let reminder = reminders
            .iter_mut()
            .find(|r| r.id == id && r.status == ReminderStatus::Pending)
            .ok_or_else(|| SchedulerError::ReminderNotFound(id.to_string()))?;
        reminder.status = ReminderStatus::Cancelled;
        self.save(&reminders);
        info!(id, "reminder cancelled");
        Ok(())
    }

    /// Pending reminders due at or before `now`, atomically flipped to
    /// fired. The persisted transition precedes any delivery attempt.
    pub fn claim_due(&self, now: DateTime<Utc>) -> Vec<Reminder> {
        let mut reminders = self.reminders.lock().unwrap();
        let mut due = Vec::new();
        for reminder in reminders.iter_mut() {
            if reminder.status != ReminderStatus::Pending {
                continue;
            }
            let Ok(at) = DateTime::parse_from_rfc3339(&reminder.remind_at) else {
                warn!(id = %reminder.id, "unparseable remind_at, cancelling");
                reminder.status = ReminderStatus::Cancelled;
                continue;
            };
            if at.with_timezone(&Utc) <= now {
                reminder.status = ReminderStatus::Fired;
                due.push(reminder.clone());
            }
        }
        if !due.is_empty() {
            self.save(&reminders);
        }
        due
    }

    /// Revert a fired-but-undelivered reminder so the next tick retries.
    pub fn revert_to_pending(&self, id: &str) {
        let mut reminders = self.reminders.lock().unwrap();
        if let Some(r) = reminders
            .iter_mut()
            .find(|r| r.id == id && r.status == ReminderStatus::Fired)
        {
            r.status = ReminderStatus::Pending;
            self.save(&reminders);
        }
    }

    pub fn get(&self, id: &str) -> Option<Reminder> {
        self.reminders.lock().unwrap().iter().find(|r| r.id == id).cloned()
    }
}

/// Bridge for the agent's `reminder` tool.
impl steward_agent::tools::reminder::ReminderBackend for ReminderStore {
    fn add(&self, message: &str, remind_at: DateTime<Utc>) -> std::result::Result<String, String> {
        Ok(ReminderStore::add(self, message, remind_at).id)
    }

    fn list(&self) -> Vec<(String, String, String, String)> {
        ReminderStore::list(self)
            .into_iter()
            .map(|r| {
                let status = match r.status {
                    ReminderStatus::Pending => "pending",
                    ReminderStatus::Fired => "fired",
                    ReminderStatus::Cancelled => "cancelled",
                };
                (r.id, r.message, r.remind_at, status.to_string())
            })
            .collect()
    }

    fn cancel(&self, id: &str) -> std::result::Result<(), String> {
        ReminderStore::cancel(self, id).map_err(|e| e.to_string())
    }
}

/// Fallible delivery target. The gateway implements this over the active
/// transport; tests implement it directly.
#[async_trait]
pub trait ReminderDelivery: Send + Sync {
    async fn deliver(&self, reminder: &Reminder) -> std::result::Result<(), String>;
}

pub struct ReminderScheduler {
    store: Arc<ReminderStore>,
    delivery: Arc<dyn ReminderDelivery>,
    dlq: Arc<DeadLetterQueue>,
}

impl ReminderScheduler {
    pub fn new(
        store: Arc<ReminderStore>,
        delivery: Arc<dyn ReminderDelivery>,
        dlq: Arc<DeadLetterQueue>,
    ) -> Self {
        Self {
            store,
            delivery,
            dlq,
        }
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        info!("reminder scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("reminder scheduler shutting down");
                    return;
                }
                _ = tokio::time::sleep(TICK) => {
                    self.tick_once(Utc::now()).await;
                }
            }
        }
    }

    /// One scheduling pass: claim due reminders (persisting the transition
    /// first), then attempt delivery.
    pub async fn tick_once(&self, now: DateTime<Utc>) {
        for reminder in self.store.claim_due(now) {
            let key = format!("reminder:{}", reminder.id);
            match self.delivery.deliver(&reminder).await {
                Ok(()) => {
                    self.dlq.record_success(&key);
                    info!(id = %reminder.id, "reminder delivered");
                }
                Err(e) => {
                    let parked = self.dlq.record_failure(
                        &key,
                        &e,
                        json!({"message": reminder.message, "remind_at": reminder.remind_at}),
                    );
                    if parked {
                        // Three failed deliveries: stays fired, never retried.
                        error!(id = %reminder.id, "reminder delivery dead-lettered");
                    } else {
                        warn!(id = %reminder.id, error = %e, "delivery failed, retrying next tick");
                        self.store.revert_to_pending(&reminder.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestDelivery {
        delivered: Mutex<Vec<String>>,
        fail: AtomicBool,
        attempts: AtomicUsize,
    }

    impl TestDelivery {
        fn new() -> Self {
            Self {
                delivered: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ReminderDelivery for TestDelivery {
        async fn deliver(&self, reminder: &Reminder) -> std::result::Result<(), String> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err("transport down".into());
            }
            self.delivered.lock().unwrap().push(reminder.message.clone());
            Ok(())
        }
    }

    fn scheduler(
        dir: &std::path::Path,
    ) -> (Arc<ReminderScheduler>, Arc<ReminderStore>, Arc<TestDelivery>) {
        let store = Arc::new(ReminderStore::load(dir.join("reminders.json")));
        let delivery = Arc::new(TestDelivery::new());
        let dlq = Arc::new(DeadLetterQueue::load(dir.join("dlq.json")));
        let scheduler = Arc::new(ReminderScheduler::new(
            store.clone(),
            delivery.clone(),
            dlq,
        ));
        (scheduler, store, delivery)
    }

    #[tokio::test]
    async fn due_reminder_fires_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store, delivery) = scheduler(dir.path());

        let r = store.add("call mom", Utc::now() - chrono::Duration::seconds(1));
        store.add("future thing", Utc::now() + chrono::Duration::hours(1));

        scheduler.tick_once(Utc::now()).await;
        scheduler.tick_once(Utc::now()).await;

        let delivered = delivery.delivered.lock().unwrap();
        assert_eq!(delivered.as_slice(), &["call mom".to_string()]);
        assert_eq!(store.get(&r.id).unwrap().status, ReminderStatus::Fired);
        // The future reminder is untouched.
        assert_eq!(
            store.list().iter().filter(|r| r.status == ReminderStatus::Pending).count(),
            1
        );
    }

    #[tokio::test]
    async fn failed_delivery_retries_next_tick() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store, delivery) = scheduler(dir.path());
        let r = store.add("retry me", Utc::now() - chrono::Duration::seconds(1));

        delivery.fail.store(true, Ordering::SeqCst);
        scheduler.tick_once(Utc::now()).await;
        assert_eq!(store.get(&r.id).unwrap().status, ReminderStatus::Pending);

        delivery.fail.store(false, Ordering::SeqCst);
        scheduler.tick_once(Utc::now()).await;
        assert_eq!(store.get(&r.id).unwrap().status, ReminderStatus::Fired);
        assert_eq!(delivery.delivered.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn three_failed_deliveries_dead_letter() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store, delivery) = scheduler(dir.path());
        let r = store.add("doomed", Utc::now() - chrono::Duration::seconds(1));

        delivery.fail.store(true, Ordering::SeqCst);
        for _ in 0..3 {
            scheduler.tick_once(Utc::now()).await;
        }
        // Parked: stays fired, no further attempts.
        assert_eq!(store.get(&r.id).unwrap().status, ReminderStatus::Fired);
        let before = delivery.attempts.load(Ordering::SeqCst);
        scheduler.tick_once(Utc::now()).await;
        assert_eq!(delivery.attempts.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn cancelled_reminders_never_fire() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, store, delivery) = scheduler(dir.path());
        let r = store.add("nope", Utc::now() - chrono::Duration::seconds(1));
        store.cancel(&r.id).unwrap();

        scheduler.tick_once(Utc::now()).await;
        assert!(delivery.delivered.lock().unwrap().is_empty());
        assert!(store.cancel(&r.id).is_err(), "cannot cancel twice");
    }

    #[test]
    fn ids_are_eight_chars() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReminderStore::load(dir.path().join("reminders.json"));
        let r = store.add("x", Utc::now());
        assert_eq!(r.id.len(), 8);
    }
}
