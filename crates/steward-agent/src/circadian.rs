//! Circadian modifiers — time-of-day behavior flavor for replies.
//! Rule-based, zero LLM calls, zero latency.

use chrono::Timelike;
use chrono_tz::Tz;

/// Prompt modifier for the current hour in the user's timezone. Empty
/// during work hours, the default professional mode.
pub fn context(tz: Tz) -> String {
    let hour = steward_core::timezone::now_in(tz).hour();
    let modifier = modifier_for_hour(hour);
    if modifier.is_empty() {
        String::new()
    } else {
        format!("TIME-OF-DAY BEHAVIOR:\n{modifier}")
    }
}

pub fn modifier_for_hour(hour: u32) -> &'static str {
    match hour {
        6..=9 => {
            "Morning mode: lead with priorities and pending items. Be energizing and concise. \
             If no specific task, offer a quick day overview."
        }
        10..=17 => "",
        18..=21 => {
            "Evening mode: be lighter and more reflective. For new tasks, ask whether to handle \
             them now or schedule for tomorrow morning. Avoid creating urgency."
        }
        _ => {
            "Late night mode: be extra concise. Don't proactively suggest tasks. Only respond \
             to what's asked."
        }
    }
}
