use std::time::Duration;

use tracing::{info, warn};

use conclave_core::config::{BotSlotConfig, ParticipationStrategy};
use conclave_core::types::ChannelId;
use conclave_provider::{ChatMessage, RetryingClient};

/// Delay bounds accepted from the LLM, in seconds.
const MIN_DELAY_SECS: u64 = 2;
const MAX_DELAY_SECS: u64 = 15;
/// Fallback when the LLM answer is out of range or unparseable.
const DEFAULT_DELAY_SECS: u64 = 5;

pub const DEFAULT_DECISION_PROMPT: &str = "Given your role and the conversation, decide whether \
you have something genuinely new to contribute. Do not participate just to agree or repeat.";

/// Resolved runtime configuration for one bot.
#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub name: String,
    /// Natural-language role description, fed verbatim into prompts.
    pub description: String,
    pub strategy: ParticipationStrategy,
    /// Fixed for the process lifetime after startup resolution.
    pub observation_delay: Duration,
    pub decision_prompt: String,
    pub max_observation_messages: usize,
    /// Channels this bot listens on; empty means all.
    pub channels: Vec<ChannelId>,
}

impl RoleConfig {
    pub fn listens_to(&self, channel: &ChannelId) -> bool {
        self.channels.is_empty() || self.channels.contains(channel)
    }

    /// Build a runtime role from a config slot. For `aiDecide` bots with a
    /// zero configured delay the LLM is asked once at startup; the answer
    /// is clamped to [2, 15] seconds with a 5 second fallback.
    pub async fn from_slot(slot: &BotSlotConfig, client: &RetryingClient) -> Self {
        let observation_delay = if slot.strategy == ParticipationStrategy::AiDecide
            && slot.observation_delay_ms == 0
        {
            resolve_delay(client, &slot.name, &slot.role_description).await
        } else {
            Duration::from_millis(slot.observation_delay_ms)
        };

        Self {
            name: slot.name.clone(),
            description: slot.role_description.clone(),
            strategy: slot.strategy,
            observation_delay,
            decision_prompt: slot
                .decision_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_DECISION_PROMPT.to_string()),
            max_observation_messages: slot.max_observation_messages,
            channels: slot.channels.iter().map(|c| ChannelId::from(c.as_str())).collect(),
        }
    }
}

/// Ask the provider how long this role should observe before deciding.
pub async fn resolve_delay(client: &RetryingClient, name: &str, description: &str) -> Duration {
    let messages = [
        ChatMessage::system(
            "You configure observation timing for a secondary chat bot. Reply with a single \
             integer: how many seconds the bot should observe a conversation before deciding \
             whether to join. Choose between 2 and 15. No other text.",
        ),
        ChatMessage::user(format!("Bot name: {name}\nRole: {description}")),
    ];

    let secs = match client.generate(&messages, None).await.into_result() {
        Ok(generation) => match parse_first_integer(&generation.text) {
            Some(n) if (MIN_DELAY_SECS..=MAX_DELAY_SECS).contains(&n) => n,
            Some(n) => {
                warn!(bot = %name, answer = n, "delay outside [2, 15], using default");
                DEFAULT_DELAY_SECS
            }
            None => {
                warn!(bot = %name, "unparseable delay answer, using default");
                DEFAULT_DELAY_SECS
            }
        },
        Err(failure) => {
            warn!(bot = %name, error = %failure, "delay resolution failed, using default");
            DEFAULT_DELAY_SECS
        }
    };

    info!(bot = %name, delay_secs = secs, "observation delay resolved");
    Duration::from_secs(secs)
}

fn parse_first_integer(text: &str) -> Option<u64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conclave_core::config::RetryConfig;
    use conclave_provider::{Generation, LlmProvider, ProviderError};
    use std::sync::Arc;

    struct FixedAnswer(&'static str);

    #[async_trait]
    impl LlmProvider for FixedAnswer {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn generate(&self, _: &[ChatMessage]) -> Result<Generation, ProviderError> {
            Ok(Generation {
                text: self.0.to_string(),
                raw: serde_json::Value::Null,
            })
        }
    }

    fn client(answer: &'static str) -> RetryingClient {
        RetryingClient::new(Arc::new(FixedAnswer(answer)), RetryConfig::default())
    }

    #[tokio::test]
    async fn in_range_answer_is_used() {
        let d = resolve_delay(&client("7"), "critic", "a critic").await;
        assert_eq!(d, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn out_of_range_answer_falls_back_to_five_seconds() {
        assert_eq!(
            resolve_delay(&client("999"), "critic", "a critic").await,
            Duration::from_secs(5)
        );
        assert_eq!(
            resolve_delay(&client("1"), "critic", "a critic").await,
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn unparseable_answer_falls_back_to_five_seconds() {
        assert_eq!(
            resolve_delay(&client("about a minute, maybe?"), "critic", "a critic").await,
            Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn answer_embedded_in_prose_is_extracted() {
        assert_eq!(
            resolve_delay(&client("I'd say 9 seconds."), "critic", "a critic").await,
            Duration::from_secs(9)
        );
    }

    #[test]
    fn empty_channel_list_listens_everywhere() {
        let role = RoleConfig {
            name: "expert".into(),
            description: "the expert".into(),
            strategy: ParticipationStrategy::AlwaysOnUserQuestion,
            observation_delay: Duration::ZERO,
            decision_prompt: DEFAULT_DECISION_PROMPT.into(),
            max_observation_messages: 20,
            channels: Vec::new(),
        };
        assert!(role.listens_to(&ChannelId::from("anything")));

        let scoped = RoleConfig {
            channels: vec![ChannelId::from("general")],
            ..role
        };
        assert!(scoped.listens_to(&ChannelId::from("general")));
        assert!(!scoped.listens_to(&ChannelId::from("random")));
    }
}
