use serde::{Deserialize, Serialize};
use serde_json::Value;
use steward_core::types::ChannelTag;

/// One match returned by a vector search, ordered by L2 distance.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub id: String,
    pub text: String,
    pub metadata: Value,
    pub distance: f32,
}

/// A single stored conversation turn. Immutable once written; pruned by the
/// consolidator after the retention window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_msg: String,
    pub assistant_msg: String,
    pub channel: ChannelTag,
    pub timestamp: String,
    pub model_id: String,
    #[serde(default)]
    pub tool_invocations: Vec<String>,
}

/// Where a stored preference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreferenceSource {
    UserStated,
    LlmDerived,
    System,
}

impl PreferenceSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreferenceSource::UserStated => "user_stated",
            PreferenceSource::LlmDerived => "llm_derived",
            PreferenceSource::System => "system",
        }
    }
}

/// Outcome of one executed subtask, consumed by the pattern detector and by
/// the decomposer for tool-success priors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub action: String,
    pub outcome: String,
    pub success: bool,
    pub tool_used: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub timestamp: String,
}

/// Share of recent turns on a channel that were served by fallback/local
/// models instead of the primary tier.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub channel: ChannelTag,
    pub window: usize,
    pub sampled: usize,
    pub fallback_fraction: f64,
    pub flagged: bool,
}
