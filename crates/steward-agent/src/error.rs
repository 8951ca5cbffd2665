use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("memory error: {0}")]
    Memory(#[from] steward_memory::MemoryError),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Short sanitized cause for the user-visible apology (no stack traces,
    /// no keys, capped at 120 chars).
    pub fn sanitized(&self) -> String {
        let raw = match self {
            AgentError::Provider(ProviderError::RateLimited { .. }) => {
                "the model is rate-limited right now".to_string()
            }
            AgentError::Provider(ProviderError::Timeout) => "the model timed out".to_string(),
            AgentError::Provider(_) => "the model call failed".to_string(),
            AgentError::Memory(_) => "memory storage hiccup".to_string(),
            AgentError::Cancelled => "the request was cancelled".to_string(),
            AgentError::Internal(msg) => msg.clone(),
        };
        raw.chars().take(120).collect()
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
