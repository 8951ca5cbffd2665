//! Transport contract: the traits every chat adapter implements and the
//! notifier interface the background fleet publishes through. The concrete
//! Telegram/Twilio adapters live outside this repo; webhook ingress in the
//! gateway speaks these types.

pub mod allow;
pub mod channel;
pub mod error;
pub mod notify;
pub mod types;

pub use channel::Channel;
pub use error::ChannelError;
pub use notify::{chunk_text, Notifier, NotifyLevel, CHUNK_LIMIT};
pub use types::{InboundMessage, OutboundMessage};
