use std::collections::VecDeque;

use conclave_core::types::ConversationMessage;

/// Bounded rolling history for one channel. Oldest messages fall off the
/// front; timestamps are made strictly monotonic on push so ordering never
/// depends on clock resolution.
#[derive(Debug)]
pub struct RollingHistory {
    messages: VecDeque<ConversationMessage>,
    capacity: usize,
    last_timestamp_ms: i64,
}

pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

impl RollingHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity.min(64)),
            capacity,
            last_timestamp_ms: 0,
        }
    }

    /// Append a message, bumping its timestamp past the previous one if the
    /// clock hasn't advanced.
    pub fn push(&mut self, mut msg: ConversationMessage) -> ConversationMessage {
        if msg.timestamp_ms <= self.last_timestamp_ms {
            msg.timestamp_ms = self.last_timestamp_ms + 1;
        }
        self.last_timestamp_ms = msg.timestamp_ms;

        if self.messages.len() == self.capacity {
            self.messages.pop_front();
        }
        self.messages.push_back(msg.clone());
        msg
    }

    /// The newest `limit` messages, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<ConversationMessage> {
        let skip = self.messages.len().saturating_sub(limit);
        self.messages.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Default for RollingHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_bounds_the_buffer() {
        let mut history = RollingHistory::new(3);
        for i in 0..5 {
            history.push(ConversationMessage::human("alice", format!("msg {i}")));
        }
        assert_eq!(history.len(), 3);
        let recent = history.recent(10);
        assert_eq!(recent[0].content, "msg 2");
        assert_eq!(recent[2].content, "msg 4");
    }

    #[test]
    fn timestamps_are_strictly_monotonic() {
        let mut history = RollingHistory::new(10);
        let mut last = 0;
        for i in 0..20 {
            let msg = history.push(ConversationMessage::human("a", format!("{i}")));
            assert!(msg.timestamp_ms > last);
            last = msg.timestamp_ms;
        }
    }

    #[test]
    fn recent_returns_oldest_first() {
        let mut history = RollingHistory::new(10);
        history.push(ConversationMessage::human("a", "first"));
        history.push(ConversationMessage::bot("bot", "second"));

        let recent = history.recent(2);
        assert_eq!(recent[0].content, "first");
        assert_eq!(recent[1].content, "second");
        assert!(recent[1].author_is_bot);
    }
}
