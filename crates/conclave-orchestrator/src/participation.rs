use std::time::Duration;

use dashmap::DashMap;

use conclave_core::types::{BotId, ChannelId};

/// What a bot last contributed to in a channel: the topic summary and when.
#[derive(Debug, Clone)]
pub struct ParticipationRecord {
    pub topic_summary: String,
    pub at_ms: i64,
}

/// Per-(bot, channel) participation memory, used to suppress repeated
/// participation on the same topic. Records expire after `max_age`; stale
/// records are removed on read.
pub struct ParticipationTable {
    records: DashMap<(BotId, ChannelId), ParticipationRecord>,
    max_age: Duration,
}

impl ParticipationTable {
    pub fn new(max_age: Duration) -> Self {
        Self {
            records: DashMap::new(),
            max_age,
        }
    }

    /// The record for this (bot, channel) if it exists and is still fresh.
    /// Expired records are dropped on the way out.
    pub fn get_fresh(&self, bot: &BotId, channel: &ChannelId) -> Option<ParticipationRecord> {
        let key = (bot.clone(), channel.clone());
        let now = chrono::Utc::now().timestamp_millis();
        let stale = {
            let entry = self.records.get(&key)?;
            now - entry.at_ms > self.max_age.as_millis() as i64
        };
        if stale {
            self.records.remove(&key);
            return None;
        }
        self.records.get(&key).map(|e| e.clone())
    }

    pub fn update(&self, bot: &BotId, channel: &ChannelId, topic_summary: String) {
        self.records.insert(
            (bot.clone(), channel.clone()),
            ParticipationRecord {
                topic_summary,
                at_ms: chrono::Utc::now().timestamp_millis(),
            },
        );
    }

    pub fn clear(&self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Drop every expired record. Called opportunistically; the table is
    /// otherwise unbounded but pruned by age.
    pub fn prune(&self) -> usize {
        let now = chrono::Utc::now().timestamp_millis();
        let max_ms = self.max_age.as_millis() as i64;
        let before = self.records.len();
        self.records.retain(|_, r| now - r.at_ms <= max_ms);
        before - self.records.len()
    }
}
