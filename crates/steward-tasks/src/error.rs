use thiserror::Error;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("decomposition failed: {0}")]
    Decompose(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TaskError>;
