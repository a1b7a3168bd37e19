use async_trait::async_trait;
use tokio::sync::broadcast;

use conclave_core::types::{ChannelId, ConversationMessage};

use crate::error::ChannelError;
use crate::types::{InboundEvent, OutboundMessage};

/// Common interface implemented by every channel adapter (Discord,
/// Telegram, the in-process webchat, …).
///
/// Implementations must be `Send + Sync` so they can be shared behind an
/// `Arc` and driven from multiple Tokio tasks.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable lowercase identifier for this adapter (e.g. `"local"`).
    fn name(&self) -> &str;

    /// Deliver one outbound message. `&self` so a connected adapter can
    /// send concurrently without a mutable borrow.
    async fn send_message(&self, msg: &OutboundMessage) -> Result<(), ChannelError>;

    /// The last `limit` messages of a channel, oldest first. Includes both
    /// user input and bot replies.
    async fn fetch_history(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, ChannelError>;

    /// Subscribe to inbound messages across every channel this adapter
    /// serves. Each subscriber sees every event.
    fn subscribe(&self) -> broadcast::Receiver<InboundEvent>;
}
