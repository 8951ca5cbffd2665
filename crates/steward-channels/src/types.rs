use serde::{Deserialize, Serialize};
use steward_core::types::ChannelTag;

/// A message received from an external transport, already reduced to the
/// three fields the pipeline needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: ChannelTag,

    /// Platform-native identifier for the sender (chat id, phone number).
    pub sender_id: String,

    /// Plain text content of the message.
    pub text: String,

    /// ISO-8601 timestamp of when the message was received.
    pub timestamp: String,
}

/// A reply or proactive message headed back out through a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: ChannelTag,
    pub recipient_id: String,
    pub text: String,
}
