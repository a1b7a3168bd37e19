use std::collections::VecDeque;
use std::time::{Duration, Instant};

use conclave_core::types::ConversationMessage;

/// Entries older than this are garbage-collected on each enqueue.
pub const ENTRY_TTL: Duration = Duration::from_secs(300);

#[derive(Debug)]
pub struct QueueFull;

struct QueuedEntry {
    message: ConversationMessage,
    enqueued_at: Instant,
}

/// Bounded pending queue for one (bot, channel) pair. New messages are
/// rejected when the bound is reached; stale entries are collected on the
/// way in so a quiet channel can't stay clogged forever.
pub struct PendingQueue {
    entries: VecDeque<QueuedEntry>,
    bound: usize,
}

impl PendingQueue {
    pub fn new(bound: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            bound,
        }
    }

    /// Enqueue, collecting expired entries first. Returns the number of
    /// expired entries dropped, or `QueueFull` when the bound is hit.
    pub fn push(&mut self, message: ConversationMessage) -> Result<usize, QueueFull> {
        let expired = self.collect_expired(ENTRY_TTL);
        if self.entries.len() >= self.bound {
            return Err(QueueFull);
        }
        self.entries.push_back(QueuedEntry {
            message,
            enqueued_at: Instant::now(),
        });
        Ok(expired)
    }

    pub fn pop(&mut self) -> Option<ConversationMessage> {
        self.entries.pop_front().map(|e| e.message)
    }

    /// Take everything currently queued, oldest first.
    pub fn drain(&mut self) -> Vec<ConversationMessage> {
        self.entries.drain(..).map(|e| e.message).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn collect_expired(&mut self, ttl: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.enqueued_at.elapsed() < ttl);
        before - self.entries.len()
    }

    #[cfg(test)]
    fn push_aged(&mut self, message: ConversationMessage, age: Duration) {
        self.entries.push_back(QueuedEntry {
            message,
            enqueued_at: Instant::now() - age,
        });
    }
}
