use serde::{Deserialize, Serialize};

use conclave_core::types::{ChannelId, ConversationMessage};

/// A message to be delivered into a channel, with author attribution so
/// sibling bots see who wrote it in the shared history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub channel: ChannelId,
    /// Display name of the sending bot.
    pub author: String,
    pub content: String,
}

impl OutboundMessage {
    pub fn new(
        channel: impl Into<ChannelId>,
        author: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            author: author.into(),
            content: content.into(),
        }
    }
}

/// One inbound message as delivered to subscribers: which channel it
/// arrived on plus the message itself.
pub type InboundEvent = (ChannelId, ConversationMessage);
