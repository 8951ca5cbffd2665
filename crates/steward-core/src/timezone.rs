//! User-timezone helpers. All user-facing scheduling (reminders, digest,
//! attention waking hours) runs in the configured IANA timezone, not UTC.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// Parse the configured timezone name, falling back to US Pacific.
pub fn user_tz(name: &str) -> Tz {
    name.parse().unwrap_or(chrono_tz::America::Los_Angeles)
}

/// Current time in the user's timezone.
pub fn now_in(tz: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&tz)
}

/// One-line time description for system-prompt injection.
pub fn time_context(tz: Tz) -> String {
    let t = now_in(tz);
    format!(
        "Current time: {} ({})",
        t.format("%Y-%m-%d %H:%M %Z"),
        t.format("%A")
    )
}

/// Parse "HH:MM" into (hour, minute). Returns `None` on malformed input.
pub fn parse_hhmm(s: &str) -> Option<(u32, u32)> {
    let (h, m) = s.split_once(':')?;
    let hour: u32 = h.parse().ok()?;
    let minute: u32 = m.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}
