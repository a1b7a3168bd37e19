//! Observation task execution: after the role's delay, look at the recent
//! conversation, check whether the topic moved on since this bot last
//! spoke, ask the LLM whether to participate, and post the reply.
//!
//! Every provider failure in here is conservative: the task aborts without
//! participation. Only a failure in the final reply is surfaced to the
//! channel, as a user-friendly message.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use conclave_core::metrics::Metrics;
use conclave_core::types::{ChannelId, ConversationMessage};
use conclave_provider::extract::extract_json;
use conclave_provider::{ChatMessage, RetryingClient};
use conclave_channels::{ChannelAdapter, OutboundMessage};

use crate::orchestrator::BotRuntime;

/// Topic summaries keep the first 200 characters of the newest user message.
const TOPIC_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Deserialize)]
struct ParticipationDecision {
    #[serde(rename = "shouldParticipate")]
    should_participate: bool,
    #[serde(default)]
    reason: String,
}

/// Run one observation for (bot, channel). The delay has already elapsed;
/// the caller removes the task's cancellation token afterwards.
pub(crate) async fn execute(
    bot: Arc<BotRuntime>,
    adapter: Arc<dyn ChannelAdapter>,
    client: Arc<RetryingClient>,
    metrics: Arc<Metrics>,
    channel: ChannelId,
) {
    // Queued entries were only context hints; history is authoritative.
    bot.drain_queue(&channel);

    let history = match adapter
        .fetch_history(&channel, bot.role.max_observation_messages)
        .await
    {
        Ok(h) => h,
        Err(e) => {
            warn!(bot = %bot.role.name, channel = %channel, error = %e, "history fetch failed, aborting observation");
            return;
        }
    };
    let Some(newest_user) = history.iter().rev().find(|m| !m.author_is_bot) else {
        return;
    };
    let topic: String = newest_user.content.chars().take(TOPIC_SUMMARY_CHARS).collect();

    // Topic-change check: no record (or a stale one) counts as changed.
    let changed = match bot.participation.get_fresh(&bot.id, &channel) {
        None => true,
        Some(record) => topic_changed(&client, &record.topic_summary, &topic).await,
    };
    if !changed {
        debug!(bot = %bot.role.name, channel = %channel, "topic unchanged, staying quiet");
        return;
    }

    if !should_participate(&client, &bot, &history).await {
        debug!(bot = %bot.role.name, channel = %channel, "decided not to participate");
        return;
    }

    match generate_reply(&client, &bot, &history).await {
        Ok(reply) => {
            let outbound = OutboundMessage::new(channel.clone(), bot.role.name.clone(), reply);
            if let Err(e) = adapter.send_message(&outbound).await {
                warn!(bot = %bot.role.name, channel = %channel, error = %e, "failed to post observation reply");
                return;
            }
            bot.participation.update(&bot.id, &channel, topic);
            Metrics::incr(&metrics.participations);
        }
        Err(user_message) => {
            // Final-reply failures are the one case reported to the channel.
            let outbound = OutboundMessage::new(channel.clone(), bot.role.name.clone(), user_message);
            let _ = adapter.send_message(&outbound).await;
        }
    }
}

/// LLM judgment: do the two summaries concern materially different
/// subjects? Unclear output or provider failure counts as "unchanged".
async fn topic_changed(client: &RetryingClient, previous: &str, current: &str) -> bool {
    let messages = [
        ChatMessage::system(
            "You compare conversation topics. Reply with exactly one word: YES or NO.",
        ),
        ChatMessage::user(format!(
            "Topic A (what the bot last contributed to): {previous}\n\
             Topic B (the conversation now): {current}\n\n\
             Do A and B concern materially different subjects? Answer exactly YES or NO."
        )),
    ];

    match client.generate(&messages, None).await.into_result() {
        Ok(generation) => {
            let upper = generation.text.trim().to_ascii_uppercase();
            if upper.starts_with("YES") {
                true
            } else if upper.starts_with("NO") {
                false
            } else {
                debug!(answer = %generation.text, "unclear topic comparison, treating as unchanged");
                false
            }
        }
        Err(failure) => {
            warn!(error = %failure, "topic comparison failed, treating as unchanged");
            false
        }
    }
}

/// Structured participation decision. Parse failure or provider failure
/// means "do not participate".
async fn should_participate(
    client: &RetryingClient,
    bot: &BotRuntime,
    history: &[ConversationMessage],
) -> bool {
    let messages = [
        ChatMessage::system(format!(
            "You are {name}. {description}\n\n{decision_prompt}\n\n\
             Respond with JSON only: {{\"shouldParticipate\": true|false, \"reason\": string}}.",
            name = bot.role.name,
            description = bot.role.description,
            decision_prompt = bot.role.decision_prompt,
        )),
        ChatMessage::user(format!("The conversation:\n{}", format_history(history))),
    ];

    match client.generate(&messages, None).await.into_result() {
        Ok(generation) => match extract_json::<ParticipationDecision>(&generation.text) {
            Some(decision) => {
                debug!(
                    bot = %bot.role.name,
                    participate = decision.should_participate,
                    reason = %decision.reason,
                    "participation decision"
                );
                decision.should_participate
            }
            None => {
                debug!(bot = %bot.role.name, "unparseable decision, not participating");
                false
            }
        },
        Err(failure) => {
            warn!(bot = %bot.role.name, error = %failure, "decision call failed, not participating");
            false
        }
    }
}

/// Produce the actual contribution. On failure, returns the pre-authored
/// user message for the error code as `Err`.
async fn generate_reply(
    client: &RetryingClient,
    bot: &BotRuntime,
    history: &[ConversationMessage],
) -> Result<String, String> {
    let messages = [
        ChatMessage::system(format!(
            "You are {name}. {description}\n\nContribute one focused message to the \
             conversation below, in your own voice. Do not repeat what others already said.",
            name = bot.role.name,
            description = bot.role.description,
        )),
        ChatMessage::user(format!("The conversation:\n{}", format_history(history))),
    ];

    client
        .generate(&messages, None)
        .await
        .into_result()
        .map(|g| g.text)
        .map_err(|failure| failure.user_message)
}

/// Render history for prompt injection, marking bot authors.
pub(crate) fn format_history(history: &[ConversationMessage]) -> String {
    history
        .iter()
        .map(|m| {
            if m.author_is_bot {
                format!("{} [bot]: {}", m.author, m.content)
            } else {
                format!("{}: {}", m.author, m.content)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_formatting_marks_bots() {
        let history = vec![
            ConversationMessage::human("alice", "what do you all think?"),
            ConversationMessage::bot("expert", "here's my view"),
        ];
        let rendered = format_history(&history);
        assert_eq!(rendered, "alice: what do you all think?\nexpert [bot]: here's my view");
    }

    #[test]
    fn decision_json_parses_with_and_without_reason() {
        let full: ParticipationDecision =
            extract_json(r#"{"shouldParticipate": true, "reason": "new angle"}"#).unwrap();
        assert!(full.should_participate);

        let bare: ParticipationDecision = extract_json(r#"{"shouldParticipate": false}"#).unwrap();
        assert!(!bare.should_participate);
    }
}
