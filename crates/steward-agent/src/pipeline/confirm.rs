//! Confirmation phrase matching for the pending-action loop. Rule-based on
//! purpose: approving an irreversible action must never depend on a model
//! call that could hallucinate a yes.

const AFFIRMATIVE: &[&str] = &[
    "yes",
    "y",
    "yep",
    "yeah",
    "sure",
    "ok",
    "okay",
    "do it",
    "go ahead",
    "confirm",
    "confirmed",
    "approved",
    "send it",
    "post it",
    "yes do it",
    "go for it",
];

const NEGATIVE: &[&str] = &[
    "no",
    "nope",
    "don't",
    "dont",
    "stop",
    "hold off",
    "not now",
    "cancel that",
    "never mind",
    "nevermind",
    "abort",
];

fn normalize(message: &str) -> String {
    message
        .trim()
        .trim_end_matches(['.', '!', '?'])
        .to_lowercase()
}

/// True when the whole message is an approval of the pending proposal.
pub fn is_affirmative(message: &str) -> bool {
    let norm = normalize(message);
    AFFIRMATIVE.contains(&norm.as_str())
        || norm.starts_with("yes,")
        || norm.starts_with("yes ")
        || norm.starts_with("go ahead")
}

/// True when the message declines the pending proposal.
pub fn is_negative(message: &str) -> bool {
    let norm = normalize(message);
    NEGATIVE.contains(&norm.as_str()) || norm.starts_with("no,") || norm.starts_with("no ")
}

/// True when the message asks to cancel the in-flight operation.
pub fn is_cancel(message: &str) -> bool {
    matches!(normalize(message).as_str(), "cancel" | "abort" | "stop")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affirmatives() {
        assert!(is_affirmative("yes"));
        assert!(is_affirmative("Yes, do it!"));
        assert!(is_affirmative("go ahead"));
        assert!(is_affirmative("OK"));
        assert!(!is_affirmative("yesterday was fine"));
        assert!(!is_affirmative("what's on my calendar?"));
    }

    #[test]
    fn negatives() {
        assert!(is_negative("no"));
        assert!(is_negative("No, hold off."));
        assert!(is_negative("never mind"));
        assert!(!is_negative("nothing urgent today"));
    }

    #[test]
    fn cancel_is_exact() {
        assert!(is_cancel("cancel"));
        assert!(is_cancel("Stop"));
        assert!(!is_cancel("cancel the meeting on friday"));
    }
}
