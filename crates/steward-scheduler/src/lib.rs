//! The background fleet: reminder firing, attention engine, pattern
//! detection, memory consolidation, the daily digest, and auto-update.
//! Each component owns one long-running loop that logs errors and sleeps;
//! none of them is allowed to die.

pub mod attention;
pub mod consolidate;
pub mod digest;
pub mod error;
pub mod patterns;
pub mod reminders;
pub mod update;

pub use error::SchedulerError;
pub use reminders::{Reminder, ReminderScheduler, ReminderStatus, ReminderStore};
