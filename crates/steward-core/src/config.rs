use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Top-level config (steward.toml + STEWARD_* env overrides, env wins).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StewardConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub models: ModelsConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub update: UpdateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Model tier assignments. `default` handles the main reasoning loop,
/// `subagent` runs task decomposition output, `chat` and `intent` are the
/// cheap tiers for assessment and intent classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_model")]
    pub default: String,
    #[serde(default = "default_subagent_model")]
    pub subagent: String,
    #[serde(default = "default_small_model")]
    pub chat: String,
    #[serde(default = "default_small_model")]
    pub intent: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            default: default_model(),
            subagent: default_subagent_model(),
            chat: default_small_model(),
            intent: default_small_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    /// Optional OpenAI-compatible fallback (local model or cheaper remote).
    pub local: Option<LocalProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalProviderConfig {
    #[serde(default = "default_local_base_url")]
    pub base_url: String,
    /// Model served at the endpoint (overrides the tier model for fallback calls).
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Embedding backend for the vector stores. The model is pinned per
/// collection — changing it invalidates existing data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "http" for an OpenAI-compatible /v1/embeddings endpoint, or "hash"
    /// for the offline deterministic embedder.
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_local_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            base_url: default_local_base_url(),
            model: default_embedding_model(),
            api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Tool-loop steps per conversation turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Per-tool timeout in seconds.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Subtask retry budget for the task runner.
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    /// When true, irreversible actions are blocked unless approved this turn.
    #[serde(default)]
    pub strict_approval: bool,
    #[serde(default)]
    pub self_build_mode: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            timeout_seconds: default_timeout_seconds(),
            retry_attempts: default_retry_attempts(),
            strict_approval: false,
            self_build_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_file: default_log_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Daily digest send time, "HH:MM" in the user timezone.
    #[serde(default = "default_digest_time")]
    pub digest_time: String,
    /// IANA timezone name for all user-facing scheduling.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            digest_time: default_digest_time(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    /// Sender identities (chat ids, phone numbers) allowed to reach the agent.
    /// Empty means nobody gets in — the allow-list is mandatory.
    #[serde(default)]
    pub allowed_senders: Vec<String>,
    /// Per-channel webhook shared secrets (HMAC-SHA256 over the raw body).
    #[serde(default)]
    pub webhook_secrets: std::collections::HashMap<String, String>,
    /// When true a condensed task report is also pushed to whatsapp.
    #[serde(default)]
    pub whatsapp_condensed_reports: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Restrict dependency updates to security advisories.
    #[serde(default = "bool_true")]
    pub security_only: bool,
    /// Request a service restart after applying updates or pulling commits.
    #[serde(default)]
    pub auto_restart: bool,
    /// Source checkout to watch for new commits. Empty disables git checks.
    #[serde(default)]
    pub repo_root: String,
    /// Env file watched for credential changes.
    #[serde(default = "default_env_file")]
    pub env_file: String,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            security_only: true,
            auto_restart: false,
            repo_root: String::new(),
            env_file: default_env_file(),
        }
    }
}

impl StewardConfig {
    /// Load config from a TOML file with STEWARD_* env var overrides.
    pub fn load(config_path: Option<&str>) -> crate::Result<Self> {
        let path = config_path.unwrap_or("steward.toml");

        let config: StewardConfig = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("STEWARD_").split("_"))
            .extract()
            .map_err(|e| crate::StewardError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Boot-time validation: a missing LLM credential is unrecoverable.
    pub fn validate(&self) -> crate::Result<()> {
        if self.providers.anthropic.is_none() && self.providers.local.is_none() {
            return Err(crate::StewardError::MissingCredential(
                "no LLM provider configured (providers.anthropic or providers.local)".into(),
            ));
        }
        if let Some(ref a) = self.providers.anthropic {
            if a.api_key.is_empty() {
                return Err(crate::StewardError::MissingCredential(
                    "providers.anthropic.api_key is empty".into(),
                ));
            }
        }
        Ok(())
    }
}

fn bool_true() -> bool {
    true
}
fn default_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    18990
}
fn default_model() -> String {
    "claude-opus-4-6".to_string()
}
fn default_subagent_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_small_model() -> String {
    "claude-haiku-4-5".to_string()
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_local_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_provider() -> String {
    "hash".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_max_iterations() -> usize {
    8
}
fn default_timeout_seconds() -> u64 {
    60
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_data_dir() -> String {
    "./data".to_string()
}
fn default_log_file() -> String {
    "./data/logs/steward.log".to_string()
}
fn default_digest_time() -> String {
    "09:00".to_string()
}
fn default_timezone() -> String {
    "America/Los_Angeles".to_string()
}
fn default_env_file() -> String {
    ".env".to_string()
}
