//! Tone analyzer — rule-based emotional-register detection for incoming
//! messages. Zero LLM calls. Scores every register in parallel so multiple
//! weak signals accumulate instead of one false-positive keyword deciding;
//! negation-aware so "no problem" never reads as stressed.

use std::sync::LazyLock;

use regex::Regex;

use steward_memory::working::Tone;

/// The detected tone of an incoming message.
#[derive(Debug, Clone)]
pub struct ToneSignal {
    pub register: Tone,
    /// 0.0 - 1.0
    pub urgency: f64,
    pub brevity_preferred: bool,
    /// Human-readable reason, for logging.
    pub note: &'static str,
}

struct Pattern {
    regex: Regex,
    weight: i32,
    negation_sensitive: bool,
}

fn pat(re: &str, weight: i32, negation_sensitive: bool) -> Pattern {
    Pattern {
        regex: Regex::new(&format!("(?i){re}")).unwrap(),
        weight,
        negation_sensitive,
    }
}

static NEGATION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(no|not|no longer|nothing|never|don'?t|doesn'?t|isn'?t|aren'?t|wasn'?t|weren'?t)\s+$").unwrap()
});

static URGENT: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        pat(r"\basap\b", 2, false),
        pat(r"\burgent\b", 2, false),
        pat(r"\bquick(ly)?\b", 1, true),
        pat(r"\b(do|need|send|fix|handle|finish|call|get|reply|respond)\b.{0,15}\bnow\b", 2, false),
        pat(r"\bimmediately\b", 2, false),
        pat(r"\bfast\b", 1, true),
        pat(r"\bhurry\b", 2, false),
        pat(r"\bno time\b", 2, false),
        pat(r"\bin (\d+ )?(min|hour|sec)", 1, false),
        pat(r"!!+", 1, false),
    ]
});

static STRESSED: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        pat(r"\bstress(ed|ful)?\b", 2, false),
        pat(r"\bworried\b", 2, false),
        pat(r"\bpanic(king)?\b", 2, false),
        pat(r"\bproblem\b", 1, true),
        pat(r"\bcrisis\b", 2, false),
        pat(r"\bmess(ed)? up\b", 2, false),
        pat(r"\bwrong\b", 1, true),
        pat(r"\bfailed?\b", 1, true),
        pat(r"\bbroken\b", 1, true),
        pat(r"\bugh\b", 2, false),
        pat(r"\bhelp me\b", 2, false),
        pat(r"\bcan('t| ?not) figure\b", 2, false),
    ]
});

static RELAXED: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        pat(r"\bwhen you get a chance\b", 3, false),
        pat(r"\bno rush\b", 3, false),
        pat(r"\btake your time\b", 3, false),
        pat(r"\bwhenever\b", 2, false),
        pat(r"\bjust curious\b", 2, false),
        pat(r"\bby the way\b", 2, false),
        pat(r"\bfyi\b", 2, false),
        pat(r"\bwondering\b", 1, false),
        pat(r"\bno problem\b", 2, false),
        pat(r"\bno worries\b", 2, false),
    ]
});

static FORMAL: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        pat(r"\bregarding\b", 1, false),
        pat(r"\bherewith\b", 2, false),
        pat(r"\bpursuant\b", 2, false),
        pat(r"\bforthwith\b", 2, false),
        pat(r"\benclosed\b", 1, false),
        pat(r"\brespectfully\b", 1, false),
        pat(r"\bkindly\b", 2, false),
    ]
});

fn score(text: &str, patterns: &[Pattern]) -> i32 {
    let mut total = 0;
    for p in patterns {
        let Some(m) = p.regex.find(text) else { continue };
        if p.negation_sensitive && NEGATION_PREFIX.is_match(&text[..m.start()]) {
            continue;
        }
        total += p.weight;
    }
    total
}

/// Detect the emotional tone of an incoming message. All categories are
/// scored and the highest wins; relaxed signals dampen spurious
/// urgent/stressed hits ("no rush" cancels "quick").
pub fn analyze(message: &str) -> ToneSignal {
    let text = message.trim();
    let word_count = text.split_whitespace().count();

    if word_count < 2 {
        return ToneSignal {
            register: Tone::Neutral,
            urgency: 0.2,
            brevity_preferred: true,
            note: "very short message",
        };
    }

    let relaxed = score(text, &RELAXED);
    let mut urgent = score(text, &URGENT);
    let mut stressed = score(text, &STRESSED);
    let formal = score(text, &FORMAL);

    if relaxed > 0 {
        urgent = (urgent - relaxed).max(0);
        stressed = (stressed - relaxed).max(0);
    }

    // Threshold of 2 so a single weak match never decides the register.
    let best = [
        (Tone::Urgent, urgent),
        (Tone::Stressed, stressed),
        (Tone::Formal, formal),
        (Tone::Relaxed, relaxed),
    ]
    .into_iter()
    .max_by_key(|(_, s)| *s)
    .unwrap();

    if best.1 >= 2 {
        return match best.0 {
            Tone::Urgent => ToneSignal {
                register: Tone::Urgent,
                urgency: 0.9,
                brevity_preferred: true,
                note: "urgency keywords detected",
            },
            Tone::Stressed => ToneSignal {
                register: Tone::Stressed,
                urgency: 0.7,
                brevity_preferred: false,
                note: "stress keywords detected",
            },
            Tone::Formal => ToneSignal {
                register: Tone::Formal,
                urgency: 0.3,
                brevity_preferred: false,
                note: "formal language detected",
            },
            _ => ToneSignal {
                register: Tone::Relaxed,
                urgency: 0.1,
                brevity_preferred: false,
                note: "relaxed phrasing detected",
            },
        };
    }

    if word_count <= 5 {
        return ToneSignal {
            register: Tone::Neutral,
            urgency: 0.5,
            brevity_preferred: true,
            note: "short message",
        };
    }

    ToneSignal {
        register: Tone::Neutral,
        urgency: 0.2,
        brevity_preferred: false,
        note: "no strong signal",
    }
}
