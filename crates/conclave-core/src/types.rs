use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Stable identifier for a human user, as reported by the channel adapter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a chat channel (Discord channel, Telegram chat, webchat
/// room, …) in the channel adapter's native format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ChannelId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier for a configured bot (the display name from its role config).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BotId(pub String);

impl BotId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BotId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Compound identifier for a (user, channel) conversation.
///
/// Wire format: `user:<user_id>|channel:<channel_id>`. The `%` and `|`
/// characters inside either id are percent-escaped so the delimiter cannot
/// occur within a component — the encoding is injective and `parse` is a
/// total inverse of `encode`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub user_id: UserId,
    pub channel_id: ChannelId,
}

const SESSION_USER_PREFIX: &str = "user:";
const SESSION_CHANNEL_MARKER: &str = "|channel:";

impl SessionKey {
    pub fn new(user_id: impl Into<UserId>, channel_id: impl Into<ChannelId>) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Canonical wire-format string.
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}",
            SESSION_USER_PREFIX,
            escape_component(self.user_id.as_str()),
            SESSION_CHANNEL_MARKER,
            escape_component(self.channel_id.as_str()),
        )
    }

    /// Parse a wire-format key. Rejects anything that does not match the
    /// exact `user:…|channel:…` shape.
    pub fn parse(s: &str) -> crate::error::Result<Self> {
        let rest = s
            .strip_prefix(SESSION_USER_PREFIX)
            .ok_or_else(|| CoreError::InvalidSessionKey(format!("missing 'user:' prefix: {s}")))?;

        let marker_pos = rest.find(SESSION_CHANNEL_MARKER).ok_or_else(|| {
            CoreError::InvalidSessionKey(format!("missing '|channel:' segment: {s}"))
        })?;

        let user_part = &rest[..marker_pos];
        let channel_part = &rest[marker_pos + SESSION_CHANNEL_MARKER.len()..];

        if user_part.is_empty() || channel_part.is_empty() {
            return Err(CoreError::InvalidSessionKey(format!(
                "key components must not be empty: {s}"
            )));
        }
        // Escaped components never contain a raw '|' — a second marker means
        // the input was not produced by `encode`.
        if channel_part.contains('|') || user_part.contains('|') {
            return Err(CoreError::InvalidSessionKey(format!(
                "unescaped delimiter inside component: {s}"
            )));
        }

        Ok(Self {
            user_id: UserId(unescape_component(user_part)?),
            channel_id: ChannelId(unescape_component(channel_part)?),
        })
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_component(escaped: &str) -> crate::error::Result<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        let pair: String = chars.by_ref().take(2).collect();
        match pair.as_str() {
            "25" => out.push('%'),
            "7C" => out.push('|'),
            other => {
                return Err(CoreError::InvalidSessionKey(format!(
                    "bad escape sequence '%{other}'"
                )))
            }
        }
    }
    Ok(out)
}

/// A single message observed in a channel.
///
/// Created on channel receive, held in the per-channel rolling history, and
/// consumed by observation windows. `timestamp_ms` is assigned by the
/// history buffer and is strictly monotonic within a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Display name of the author (human user or sibling bot).
    pub author: String,
    /// True when the author is one of the configured bots.
    pub author_is_bot: bool,
    pub content: String,
    /// Milliseconds since the Unix epoch, monotonic per channel.
    pub timestamp_ms: i64,
}

impl ConversationMessage {
    pub fn human(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            author_is_bot: false,
            content: content.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn bot(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            author_is_bot: true,
            content: content.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }
}
