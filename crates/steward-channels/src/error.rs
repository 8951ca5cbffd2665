use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("send failed on {channel}: {reason}")]
    Send { channel: String, reason: String },

    #[error("sender not authorized: {0}")]
    Unauthorized(String),

    #[error("channel disconnected: {0}")]
    Disconnected(String),
}
