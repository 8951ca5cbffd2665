//! Policy gate — deterministic permission checks before tool execution.
//!
//! Sits between the reasoning loop (which decides what to call) and the
//! tools (which execute). Risk is a lookup table, not an annotation on the
//! tool; missing operations fall to the tool's default, unknown tools to
//! `Write`.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

/// Per-run cap on calls per tool.
const MAX_CALLS_PER_RUN: u32 = 20;
/// String params longer than this are truncated in logs.
const LOG_PARAM_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Reading data, always safe.
    Read,
    /// Writing or modifying data.
    Write,
    /// Cannot be undone once executed.
    Irreversible,
}

/// Risk for a `(tool, operation)` pair.
pub fn risk_for(tool: &str, operation: Option<&str>) -> RiskLevel {
    use RiskLevel::*;
    match (tool, operation) {
        ("shell", _) => Write,
        ("file_operations", _) => Write,
        ("web_search", _) | ("web_fetch", _) | ("browser", _) => Read,
        ("clock", _) => Read,
        ("contacts", _) => Read,

        ("email", Some("read_emails")) | ("email", Some("search_emails")) => Read,
        ("email", Some("send_email")) | ("email", Some("reply_email")) => Irreversible,
        ("email", _) => Write,

        ("calendar", Some("list_events")) | ("calendar", Some("search_events")) => Read,
        ("calendar", Some("delete_event")) => Irreversible,
        ("calendar", _) => Write,

        ("x_tool", _) => Irreversible,
        ("send_whatsapp_message", _) => Irreversible,
        ("make_phone_call", _) => Irreversible,

        ("reminder", Some("list_reminders")) => Read,
        ("reminder", _) => Write,

        ("linkedin", _) => Write,
        ("steward_task", _) => Write,

        _ => Write,
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
    pub risk: RiskLevel,
}

/// Deterministic policy gate for tool execution governance.
///
/// Counters are per-run: reset at the start of each conversation turn and
/// each task run.
pub struct PolicyGate {
    /// When true, irreversible calls are blocked unless the turn carries an
    /// approval token.
    strict: bool,
    call_counts: Mutex<HashMap<String, u32>>,
}

impl PolicyGate {
    pub fn new(strict: bool) -> Self {
        Self {
            strict,
            call_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a tool call may proceed.
    ///
    /// `approved` marks that the user confirmed this specific action in the
    /// current turn; strict mode only lets irreversible calls through with it.
    pub fn check(
        &self,
        tool: &str,
        operation: Option<&str>,
        params: Option<&Value>,
        trace_id: &str,
        approved: bool,
    ) -> GateDecision {
        let risk = risk_for(tool, operation);

        // Rate limit first so a runaway loop cannot hammer the log either.
        {
            let mut counts = self.call_counts.lock().unwrap();
            let count = counts.entry(tool.to_string()).or_insert(0);
            if *count >= MAX_CALLS_PER_RUN {
                let reason = format!("tool {tool} exceeded max calls per run ({MAX_CALLS_PER_RUN})");
                warn!(trace = trace_id, tool, "policy gate blocked: {reason}");
                return GateDecision {
                    allowed: false,
                    reason,
                    risk,
                };
            }
            *count += 1;
        }

        match risk {
            RiskLevel::Irreversible => {
                warn!(
                    trace = trace_id,
                    tool,
                    operation = operation.unwrap_or("-"),
                    params = %sanitize_params(params),
                    "policy gate: irreversible action"
                );
                if self.strict && !approved {
                    let op = operation.unwrap_or("-");
                    return GateDecision {
                        allowed: false,
                        reason: format!("irreversible action '{tool}.{op}' requires user approval"),
                        risk,
                    };
                }
            }
            RiskLevel::Write => {
                info!(
                    trace = trace_id,
                    tool,
                    operation = operation.unwrap_or("-"),
                    "policy gate: write action"
                );
            }
            RiskLevel::Read => {}
        }

        GateDecision {
            allowed: true,
            reason: "allowed".into(),
            risk,
        }
    }

    /// Reset per-run counters. Call at the start of each turn or task run.
    pub fn reset_run_counts(&self) {
        self.call_counts.lock().unwrap().clear();
    }
}

/// Truncate string params for logging so drafts and bodies never flood logs.
fn sanitize_params(params: Option<&Value>) -> String {
    let Some(Value::Object(map)) = params else {
        return "{}".into();
    };
    let safe: serde_json::Map<String, Value> = map
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) if s.len() > LOG_PARAM_LIMIT => {
                    Value::String(format!("{}...", &s[..floor_boundary(s, LOG_PARAM_LIMIT)]))
                }
                other => other.clone(),
            };
            (k.clone(), v)
        })
        .collect();
    Value::Object(safe).to_string()
}

fn floor_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn risk_table_lookup() {
        assert_eq!(risk_for("email", Some("read_emails")), RiskLevel::Read);
        assert_eq!(risk_for("email", Some("send_email")), RiskLevel::Irreversible);
        assert_eq!(risk_for("email", Some("archive")), RiskLevel::Write);
        assert_eq!(risk_for("x_tool", Some("anything")), RiskLevel::Irreversible);
        assert_eq!(risk_for("never-heard-of-it", None), RiskLevel::Write);
    }

    #[test]
    fn caps_at_twenty_calls_per_tool() {
        let gate = PolicyGate::new(false);
        for _ in 0..20 {
            assert!(gate.check("web_fetch", None, None, "t", false).allowed);
        }
        let decision = gate.check("web_fetch", None, None, "t", false);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("exceeded"));

        // Other tools are unaffected; reset clears the counter.
        assert!(gate.check("clock", None, None, "t", false).allowed);
        gate.reset_run_counts();
        assert!(gate.check("web_fetch", None, None, "t", false).allowed);
    }

    #[test]
    fn strict_mode_blocks_unapproved_irreversible() {
        let gate = PolicyGate::new(true);
        let decision = gate.check("x_tool", Some("post_tweet"), None, "t", false);
        assert!(!decision.allowed);
        assert!(decision.reason.contains("approval"));

        let decision = gate.check("x_tool", Some("post_tweet"), None, "t", true);
        assert!(decision.allowed);
    }

    #[test]
    fn non_strict_mode_logs_but_allows() {
        let gate = PolicyGate::new(false);
        let decision = gate.check("email", Some("send_email"), None, "t", false);
        assert!(decision.allowed);
        assert_eq!(decision.risk, RiskLevel::Irreversible);
    }

    #[test]
    fn params_are_truncated_for_logging() {
        let long = "a".repeat(300);
        let out = sanitize_params(Some(&json!({"body": long, "n": 5})));
        assert!(out.len() < 200);
        assert!(out.contains("..."));
        assert!(out.contains("\"n\":5"));
    }
}
