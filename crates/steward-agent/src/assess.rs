//! Self-assessor — a cheap post-reply confidence check. Only substantive
//! responses are assessed, and only `low` confidence surfaces anything to
//! the user (a soft "want me to dig deeper?" suffix). Fail-open on every
//! error path.

use serde::Deserialize;
use tracing::debug;

use crate::router::{ModelRouter, ModelTier};

/// Responses shorter than this skip assessment.
const MIN_RESPONSE_LEN: usize = 150;

#[derive(Debug, Clone, Deserialize)]
pub struct SelfAssessment {
    pub confidence: String,
    #[serde(default)]
    pub weak_areas: Vec<String>,
    #[serde(default)]
    pub suggestion: String,
}

pub struct SelfAssessor;

impl SelfAssessor {
    /// Evaluate response confidence. Returns `None` on any error or when
    /// the response is too short to bother.
    pub async fn assess(
        router: &ModelRouter,
        query: &str,
        response: &str,
    ) -> Option<SelfAssessment> {
        if response.len() < MIN_RESPONSE_LEN {
            return None;
        }

        let system = "You are a response quality assessor. Output only JSON.";
        let prompt = format!(
            "Assess this response's quality. Reply ONLY with valid JSON:\n\
             {{\"confidence\": \"high|medium|low\", \"weak_areas\": [\"area\"], \"suggestion\": \"...\"}}\n\n\
             Rules:\n\
             - high: complete, accurate, well-grounded\n\
             - medium: mostly good, some areas could be stronger\n\
             - low: missing key information, speculative, or thin\n\
             - weak_areas: specific thin topics (max 2)\n\
             - suggestion: if low, one sentence on what to research further; empty otherwise\n\n\
             Question: {}\nResponse: {}",
            truncate(query, 300),
            truncate(response, 500),
        );

        let text = match router.complete(ModelTier::Chat, system, &prompt, 200).await {
            Ok(t) => t,
            Err(e) => {
                debug!(error = %e, "self-assessment failed, skipping");
                return None;
            }
        };

        let cleaned = text.replace("```json", "").replace("```", "");
        match serde_json::from_str::<SelfAssessment>(cleaned.trim()) {
            Ok(mut a) => {
                a.weak_areas.truncate(2);
                a.suggestion = truncate(&a.suggestion, 150);
                Some(a)
            }
            Err(e) => {
                debug!(error = %e, "self-assessment JSON unparseable, skipping");
                None
            }
        }
    }

    /// Suffix for the user-visible reply. Empty unless confidence is low.
    pub fn format_suffix(assessment: &SelfAssessment) -> String {
        if assessment.confidence != "low" {
            return String::new();
        }
        if !assessment.suggestion.is_empty() {
            return format!("\n\n_{}_", assessment.suggestion);
        }
        if !assessment.weak_areas.is_empty() {
            let areas = assessment.weak_areas.join(" and ");
            return format!(
                "\n\n_Note: the {areas} part could use more depth. Want me to dig deeper?_"
            );
        }
        String::new()
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
