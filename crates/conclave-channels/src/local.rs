use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use conclave_core::types::{ChannelId, ConversationMessage};

use crate::adapter::ChannelAdapter;
use crate::error::ChannelError;
use crate::history::RollingHistory;
use crate::types::{InboundEvent, OutboundMessage};

/// Broadcast buffer: slow subscribers start losing the oldest events past
/// this many pending messages.
const EVENT_BUFFER: usize = 256;

/// In-process channel adapter.
///
/// Backs the gateway webchat path and the test harness: channels are plain
/// named histories, inbound messages fan out over a broadcast channel, and
/// bot replies land in the same history users write to — so sibling bots
/// observe each other exactly as they would on a real platform.
pub struct LocalChannel {
    histories: Mutex<HashMap<ChannelId, RollingHistory>>,
    events: broadcast::Sender<InboundEvent>,
    history_capacity: usize,
}

impl LocalChannel {
    pub fn new(history_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            histories: Mutex::new(HashMap::new()),
            events,
            history_capacity,
        }
    }

    /// Record a human message and fan it out to subscribers. Returns the
    /// message as stored (with its monotonic timestamp).
    pub fn post_user_message(
        &self,
        channel: &ChannelId,
        author: &str,
        content: &str,
    ) -> ConversationMessage {
        let msg = self.append(channel, ConversationMessage::human(author, content));
        let _ = self.events.send((channel.clone(), msg.clone()));
        msg
    }

    /// Drop a channel's history (channel reset).
    pub fn reset_channel(&self, channel: &ChannelId) {
        if let Some(history) = self.histories.lock().unwrap().get_mut(channel) {
            history.clear();
        }
        debug!(channel = %channel, "channel history reset");
    }

    fn append(&self, channel: &ChannelId, msg: ConversationMessage) -> ConversationMessage {
        let mut histories = self.histories.lock().unwrap();
        let history = histories
            .entry(channel.clone())
            .or_insert_with(|| RollingHistory::new(self.history_capacity));
        history.push(msg)
    }
}

impl Default for LocalChannel {
    fn default() -> Self {
        Self::new(crate::history::DEFAULT_HISTORY_CAPACITY)
    }
}

#[async_trait]
impl ChannelAdapter for LocalChannel {
    fn name(&self) -> &str {
        "local"
    }

    async fn send_message(&self, msg: &OutboundMessage) -> Result<(), ChannelError> {
        let stored = self.append(
            &msg.channel,
            ConversationMessage::bot(&msg.author, &msg.content),
        );
        // Bot replies are events too — sibling bots observe them.
        let _ = self.events.send((msg.channel.clone(), stored));
        Ok(())
    }

    async fn fetch_history(
        &self,
        channel: &ChannelId,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, ChannelError> {
        let histories = self.histories.lock().unwrap();
        Ok(histories
            .get(channel)
            .map(|h| h.recent(limit))
            .unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn posted_messages_reach_subscribers_and_history() {
        let adapter = LocalChannel::default();
        let channel = ChannelId::from("general");
        let mut rx = adapter.subscribe();

        adapter.post_user_message(&channel, "alice", "hello bots");

        let (ch, msg) = rx.recv().await.unwrap();
        assert_eq!(ch, channel);
        assert_eq!(msg.content, "hello bots");
        assert!(!msg.author_is_bot);

        let history = adapter.fetch_history(&channel, 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn bot_replies_are_visible_in_history_and_events() {
        let adapter = LocalChannel::default();
        let channel = ChannelId::from("general");
        let mut rx = adapter.subscribe();

        adapter.post_user_message(&channel, "alice", "question?");
        adapter
            .send_message(&OutboundMessage::new(channel.clone(), "expert-bot", "answer."))
            .await
            .unwrap();

        let history = adapter.fetch_history(&channel, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[1].author_is_bot);
        assert_eq!(history[1].author, "expert-bot");

        let _ = rx.recv().await.unwrap();
        let (_, bot_event) = rx.recv().await.unwrap();
        assert!(bot_event.author_is_bot);
    }

    #[tokio::test]
    async fn channels_are_isolated() {
        let adapter = LocalChannel::default();
        adapter.post_user_message(&ChannelId::from("a"), "alice", "in a");
        adapter.post_user_message(&ChannelId::from("b"), "bob", "in b");

        let a = adapter.fetch_history(&ChannelId::from("a"), 10).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].content, "in a");
    }

    #[tokio::test]
    async fn reset_clears_history() {
        let adapter = LocalChannel::default();
        let channel = ChannelId::from("general");
        adapter.post_user_message(&channel, "alice", "hi");
        adapter.reset_channel(&channel);
        assert!(adapter.fetch_history(&channel, 10).await.unwrap().is_empty());
    }
}
