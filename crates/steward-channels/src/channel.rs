use async_trait::async_trait;

use crate::{error::ChannelError, types::OutboundMessage};

/// Common interface implemented by every transport adapter (Telegram, Twilio
/// WhatsApp, Twilio Voice, web chat).
///
/// Adapters receive provider payloads, authorize the sender, hand the reduced
/// `InboundMessage` to the pipeline, and deliver replies through `send`.
/// Implementations must be `Send + Sync` so they can be driven from multiple
/// Tokio tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this adapter (matches a `ChannelTag`).
    fn name(&self) -> &str;

    /// Deliver a single outbound message. Called with `&self` so a connected
    /// adapter can send concurrently.
    async fn send(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;
}
