use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("reminder not found: {0}")]
    ReminderNotFound(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
