use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use conclave_channels::{ChannelAdapter, OutboundMessage};
use conclave_core::config::{BotSlotConfig, OrchestratorConfig, ParticipationStrategy};
use conclave_core::error::{ErrorCode, Failure, OperationResult};
use conclave_core::metrics::Metrics;
use conclave_core::types::{BotId, ChannelId, ConversationMessage};
use conclave_intent::{IntentRouter, RouteAction};
use conclave_memory::types::{LifecycleKind, Provenance, SearchQuery};
use conclave_memory::MemoryEngine;
use conclave_provider::{ChatMessage, RetryingClient};

use crate::observation::{self, format_history};
use crate::participation::ParticipationTable;
use crate::queue::PendingQueue;
use crate::roles::RoleConfig;

/// Overall budget for one lead-bot reply. Streaming surfaces may exceed it.
const REPLY_TIMEOUT: Duration = Duration::from_secs(60);
/// How many remembered facts are injected into a model reply.
const MEMORY_CONTEXT_LIMIT: usize = 3;

/// Everything the orchestrator needs from the outside world.
pub struct OrchestratorDeps {
    pub adapter: Arc<dyn ChannelAdapter>,
    pub client: Arc<RetryingClient>,
    pub intent: Arc<IntentRouter>,
    pub memory: Option<Arc<MemoryEngine>>,
    pub metrics: Arc<Metrics>,
}

/// Per-bot runtime state.
pub(crate) struct BotRuntime {
    pub id: BotId,
    pub role: RoleConfig,
    pub participation: ParticipationTable,
    queues: DashMap<ChannelId, StdMutex<PendingQueue>>,
    workers: Arc<Semaphore>,
    pub(crate) observations: DashMap<ChannelId, CancellationToken>,
    queue_bound: usize,
}

impl BotRuntime {
    fn new(role: RoleConfig, config: &OrchestratorConfig) -> Self {
        Self {
            id: BotId::from(role.name.as_str()),
            participation: ParticipationTable::new(Duration::from_secs(
                config.participation_max_age_secs,
            )),
            queues: DashMap::new(),
            workers: Arc::new(Semaphore::new(config.worker_limit)),
            observations: DashMap::new(),
            queue_bound: config.queue_bound,
            role,
        }
    }

    /// Returns how many expired entries were collected, or an error when
    /// the queue is at its bound.
    fn enqueue(
        &self,
        channel: &ChannelId,
        message: ConversationMessage,
    ) -> Result<usize, crate::queue::QueueFull> {
        let queue = self
            .queues
            .entry(channel.clone())
            .or_insert_with(|| StdMutex::new(PendingQueue::new(self.queue_bound)));
        let mut guard = queue.lock().unwrap();
        guard.push(message)
    }

    fn pop_queue(&self, channel: &ChannelId) -> Option<ConversationMessage> {
        self.queues
            .get(channel)
            .and_then(|q| q.lock().unwrap().pop())
    }

    pub(crate) fn drain_queue(&self, channel: &ChannelId) -> Vec<ConversationMessage> {
        self.queues
            .get(channel)
            .map(|q| q.lock().unwrap().drain())
            .unwrap_or_default()
    }
}

/// What the lead bot produced for a message — the gateway surfaces this as
/// the `/chat` response.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub text: String,
    /// "model_reply", "computed", or "clarify".
    pub source: &'static str,
    pub skill_name: Option<String>,
    pub confidence: Option<f32>,
}

/// Coordinates every configured bot across every channel.
///
/// `alwaysOnUserQuestion` bots route and reply inline through a bounded
/// worker pool; `aiDecide` bots schedule cancellable observation tasks.
/// Per (bot, channel) at most one observation is active, and a pending
/// task is never reset by newer messages.
pub struct BotOrchestrator {
    deps: OrchestratorDeps,
    bots: Vec<Arc<BotRuntime>>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl BotOrchestrator {
    /// Resolve every bot slot (asking the provider for observation delays
    /// where configured as zero) and assemble the orchestrator.
    pub async fn start(
        config: OrchestratorConfig,
        slots: &[BotSlotConfig],
        deps: OrchestratorDeps,
    ) -> Arc<Self> {
        let mut bots = Vec::with_capacity(slots.len());
        for slot in slots {
            let role = RoleConfig::from_slot(slot, &deps.client).await;
            info!(
                bot = %role.name,
                strategy = ?role.strategy,
                delay_ms = role.observation_delay.as_millis() as u64,
                "bot configured"
            );
            bots.push(Arc::new(BotRuntime::new(role, &config)));
        }

        Arc::new(Self {
            deps,
            bots,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }

    pub fn bot_names(&self) -> Vec<String> {
        self.bots.iter().map(|b| b.role.name.clone()).collect()
    }

    /// Consume the adapter's inbound events until shutdown. Used when the
    /// adapter is externally driven; the gateway webchat path calls
    /// `on_message` directly instead.
    pub fn spawn_listener(self: &Arc<Self>) {
        let orch = self.clone();
        let mut rx = self.deps.adapter.subscribe();
        self.tasks.spawn(async move {
            loop {
                tokio::select! {
                    _ = orch.shutdown.cancelled() => break,
                    event = rx.recv() => match event {
                        Ok((channel, message)) => {
                            let _ = orch.on_message(&channel, message).await;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "listener lagged behind inbound events");
                        }
                        Err(_) => break,
                    },
                }
            }
        });
    }

    /// Feed one message to every bot listening on the channel.
    ///
    /// Human messages trigger the lead bot's reply pipeline (the returned
    /// outcome) and schedule observations for `aiDecide` bots. Bot-authored
    /// messages only accumulate as context. A full queue rejects with
    /// `BACKPRESSURE_QUEUE_FULL` and posts an apology to the channel.
    pub async fn on_message(
        self: &Arc<Self>,
        channel: &ChannelId,
        message: ConversationMessage,
    ) -> OperationResult<Option<ChatOutcome>> {
        if self.shutdown.is_cancelled() {
            return OperationResult::fail(ErrorCode::OperationCancelled, "orchestrator shut down");
        }

        let mut lead_result: Option<OperationResult<ChatOutcome>> = None;

        for bot in self.bots.iter().filter(|b| b.role.listens_to(channel)) {
            match bot.enqueue(channel, message.clone()) {
                Ok(expired) => {
                    Metrics::incr(&self.deps.metrics.messages_enqueued);
                    if expired > 0 {
                        debug!(bot = %bot.role.name, expired, "collected stale queue entries");
                    }
                }
                Err(_) => {
                    Metrics::incr(&self.deps.metrics.messages_dropped);
                    warn!(bot = %bot.role.name, channel = %channel, "queue full, dropping message");
                    let apology = OutboundMessage::new(
                        channel.clone(),
                        bot.role.name.clone(),
                        ErrorCode::BackpressureQueueFull.user_message(),
                    );
                    let _ = self.deps.adapter.send_message(&apology).await;
                    if bot.role.strategy == ParticipationStrategy::AlwaysOnUserQuestion
                        && lead_result.is_none()
                    {
                        lead_result = Some(OperationResult::fail(
                            ErrorCode::BackpressureQueueFull,
                            "per-channel queue is at its bound",
                        ));
                    }
                    continue;
                }
            }

            // Chat between bots never counts as a new user question.
            if message.author_is_bot {
                continue;
            }

            match bot.role.strategy {
                ParticipationStrategy::AlwaysOnUserQuestion => {
                    if lead_result.is_none() {
                        lead_result = Some(self.process_message(bot.clone(), channel.clone()).await);
                    } else {
                        // Additional lead-style bots reply in the background.
                        let orch = self.clone();
                        let bot = bot.clone();
                        let channel = channel.clone();
                        self.tasks.spawn(async move {
                            let _ = orch.process_message(bot, channel).await;
                        });
                    }
                }
                ParticipationStrategy::AiDecide => {
                    self.schedule_observation(bot, channel);
                }
            }
        }

        match lead_result {
            Some(result) => result.map(Some),
            None => OperationResult::ok(None),
        }
    }

    /// Cancel observation timers, clear participation records, and drain
    /// in-flight work.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.shutdown.cancel();
        for bot in &self.bots {
            for entry in bot.observations.iter() {
                entry.value().cancel();
            }
            bot.observations.clear();
            bot.participation.clear();
        }
        self.tasks.close();
        self.tasks.wait().await;
    }

    // ── Lead-bot reply pipeline ──────────────────────────────────────────────

    async fn process_message(
        self: &Arc<Self>,
        bot: Arc<BotRuntime>,
        channel: ChannelId,
    ) -> OperationResult<ChatOutcome> {
        let Ok(_permit) = bot.workers.clone().acquire_owned().await else {
            return OperationResult::fail(ErrorCode::OperationCancelled, "worker pool closed");
        };
        let Some(message) = bot.pop_queue(&channel) else {
            return OperationResult::fail(ErrorCode::SystemInternal, "queue was empty");
        };

        let work = self.reply_pipeline(&bot, &channel, &message);
        let result = match tokio::time::timeout(REPLY_TIMEOUT, work).await {
            Ok(result) => result,
            Err(_) => Err(Failure::new(
                ErrorCode::ProviderTimeout,
                format!("reply exceeded {}s budget", REPLY_TIMEOUT.as_secs()),
            )),
        };

        match result {
            Ok(outcome) => {
                let outbound = OutboundMessage::new(
                    channel.clone(),
                    bot.role.name.clone(),
                    outcome.text.clone(),
                );
                if let Err(e) = self.deps.adapter.send_message(&outbound).await {
                    warn!(channel = %channel, error = %e, "failed to deliver reply");
                }
                self.write_memory(&message).await;
                OperationResult::ok(outcome)
            }
            Err(failure) => {
                // The user sees the friendly message; the envelope carries
                // the code.
                let outbound = OutboundMessage::new(
                    channel.clone(),
                    bot.role.name.clone(),
                    failure.user_message.clone(),
                );
                let _ = self.deps.adapter.send_message(&outbound).await;
                OperationResult::Failure(failure)
            }
        }
    }

    async fn reply_pipeline(
        self: &Arc<Self>,
        bot: &Arc<BotRuntime>,
        channel: &ChannelId,
        message: &ConversationMessage,
    ) -> Result<ChatOutcome, Failure> {
        let history = self
            .deps
            .adapter
            .fetch_history(channel, bot.role.max_observation_messages)
            .await
            .unwrap_or_default();
        let context = format_history(&history);

        let routed = self
            .deps
            .intent
            .route(&message.content, Some(&context))
            .await
            .into_result();

        match routed {
            Ok(outcome) => match outcome.action {
                RouteAction::RunSkill => {
                    let name = outcome.skill_name.unwrap_or_default();
                    let input = outcome.skill_input.unwrap_or_default();
                    let text = self
                        .deps
                        .intent
                        .execute_skill(&name, &input)
                        .await
                        .into_result()?;
                    Ok(ChatOutcome {
                        text,
                        source: "computed",
                        skill_name: Some(name),
                        confidence: Some(outcome.confidence),
                    })
                }
                RouteAction::Clarify => Ok(ChatOutcome {
                    text: outcome
                        .clarification_text
                        .unwrap_or_else(|| "Could you tell me a bit more?".to_string()),
                    source: "clarify",
                    skill_name: outcome.skill_name,
                    confidence: Some(outcome.confidence),
                }),
                RouteAction::ModelReply => {
                    let text = self.model_reply(bot, message, &history).await?;
                    Ok(ChatOutcome {
                        text,
                        source: "model_reply",
                        skill_name: None,
                        confidence: Some(outcome.confidence),
                    })
                }
            },
            // A router that can't decide degrades to a conversational reply.
            Err(failure)
                if matches!(
                    failure.code,
                    ErrorCode::IntentNoDecision | ErrorCode::IntentLowConfidence
                ) =>
            {
                debug!(code = %failure.code, "router undecided, replying as model");
                let text = self.model_reply(bot, message, &history).await?;
                Ok(ChatOutcome {
                    text,
                    source: "model_reply",
                    skill_name: None,
                    confidence: None,
                })
            }
            Err(failure) => Err(failure),
        }
    }

    /// Plain model reply with role framing and memory-augmented context.
    async fn model_reply(
        &self,
        bot: &Arc<BotRuntime>,
        message: &ConversationMessage,
        history: &[ConversationMessage],
    ) -> Result<String, Failure> {
        let memory_block = self.recall_block(&message.author, &message.content).await;
        let system = format!(
            "You are {name}. {description}{memory_block}",
            name = bot.role.name,
            description = bot.role.description,
        );
        let messages = [
            ChatMessage::system(system),
            ChatMessage::user(format!(
                "Conversation so far:\n{}\n\nReply to {}'s last message.",
                format_history(history),
                message.author
            )),
        ];
        self.deps
            .client
            .generate(&messages, None)
            .await
            .into_result()
            .map(|g| g.text)
    }

    /// Render the top remembered facts about this user, or an empty string
    /// when memory is absent or has nothing relevant.
    async fn recall_block(&self, author: &str, query_text: &str) -> String {
        let Some(memory) = &self.deps.memory else {
            return String::new();
        };
        let mut query = SearchQuery::for_user(author, query_text);
        query.limit = Some(MEMORY_CONTEXT_LIMIT);
        match memory.search(&query).await.into_result() {
            Ok(hits) if !hits.is_empty() => {
                let lines: Vec<String> = hits
                    .iter()
                    .map(|h| format!("- {}", h.vector.content))
                    .collect();
                format!("\n\nThings you remember about {author}:\n{}", lines.join("\n"))
            }
            _ => String::new(),
        }
    }

    /// Record the user's message as an inferred short-term memory. Failures
    /// are logged, never surfaced — the reply already went out.
    async fn write_memory(&self, message: &ConversationMessage) {
        let Some(memory) = &self.deps.memory else {
            return;
        };
        if message.author_is_bot {
            return;
        }
        let result = memory
            .remember(
                &message.author,
                &message.content,
                LifecycleKind::ShortTerm,
                Provenance::Implicit,
                None,
            )
            .await;
        if let OperationResult::Failure(f) = result {
            warn!(error = %f, "memory write for exchange failed");
        }
    }

    // ── Observation scheduling ───────────────────────────────────────────────

    /// Start an observation for (bot, channel) unless one is already
    /// pending — a pending task completes on its original schedule.
    fn schedule_observation(self: &Arc<Self>, bot: &Arc<BotRuntime>, channel: &ChannelId) {
        let token = CancellationToken::new();
        match bot.observations.entry(channel.clone()) {
            Entry::Occupied(_) => {
                debug!(bot = %bot.role.name, channel = %channel, "observation already pending");
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }
        Metrics::incr(&self.deps.metrics.observations_started);

        let orch = self.clone();
        let bot = bot.clone();
        let channel = channel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = orch.shutdown.cancelled() => {}
                _ = tokio::time::sleep(bot.role.observation_delay) => {
                    observation::execute(
                        bot.clone(),
                        orch.deps.adapter.clone(),
                        orch.deps.client.clone(),
                        orch.deps.metrics.clone(),
                        channel.clone(),
                    )
                    .await;
                }
            }
            bot.observations.remove(&channel);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conclave_channels::LocalChannel;
    use conclave_core::config::RetryConfig;
    use conclave_intent::SkillRegistry;
    use conclave_provider::{Generation, LlmProvider, ProviderError};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedProvider {
        responses: Mutex<VecDeque<String>>,
    }

    impl ScriptedProvider {
        fn new(responses: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            })
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn generate(&self, _: &[ChatMessage]) -> Result<Generation, ProviderError> {
            let text = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| panic!("provider script exhausted"));
            Ok(Generation {
                text,
                raw: serde_json::Value::Null,
            })
        }
    }

    const DECIDE_YES: &str = r#"{"shouldParticipate": true, "reason": "something to add"}"#;

    fn slot(name: &str, strategy: ParticipationStrategy, delay_ms: u64) -> BotSlotConfig {
        BotSlotConfig {
            name: name.to_string(),
            role_description: format!("You are the {name} of this channel."),
            strategy,
            observation_delay_ms: delay_ms,
            decision_prompt: None,
            max_observation_messages: 20,
            channels: Vec::new(),
        }
    }

    struct Harness {
        orchestrator: Arc<BotOrchestrator>,
        adapter: Arc<LocalChannel>,
    }

    async fn harness(
        script: &[&str],
        slots: Vec<BotSlotConfig>,
        config: OrchestratorConfig,
    ) -> Harness {
        let adapter = Arc::new(LocalChannel::default());
        let client = Arc::new(RetryingClient::new(
            ScriptedProvider::new(script),
            RetryConfig::default(),
        ));
        let metrics = Arc::new(Metrics::new());
        let intent = Arc::new(IntentRouter::new(
            client.clone(),
            Arc::new(SkillRegistry::new()),
            0.72,
            metrics.clone(),
        ));
        let deps = OrchestratorDeps {
            adapter: adapter.clone(),
            client,
            intent,
            memory: None,
            metrics,
        };
        Harness {
            orchestrator: BotOrchestrator::start(config, &slots, deps).await,
            adapter,
        }
    }

    async fn bot_messages(adapter: &LocalChannel, channel: &ChannelId) -> Vec<ConversationMessage> {
        adapter
            .fetch_history(channel, 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.author_is_bot)
            .collect()
    }

    #[tokio::test]
    async fn lead_bot_replies_immediately_to_user_question() {
        let h = harness(
            &["The answer is 4."],
            vec![slot("expert", ParticipationStrategy::AlwaysOnUserQuestion, 0)],
            OrchestratorConfig::default(),
        )
        .await;
        let channel = ChannelId::from("general");

        let msg = h.adapter.post_user_message(&channel, "alice", "What is 2+2?");
        let outcome = h
            .orchestrator
            .on_message(&channel, msg)
            .await
            .into_result()
            .unwrap()
            .unwrap();

        assert!(outcome.text.contains('4'));
        assert_eq!(outcome.source, "model_reply");

        let bots = bot_messages(&h.adapter, &channel).await;
        assert_eq!(bots.len(), 1);
        assert_eq!(bots[0].author, "expert");
    }

    #[tokio::test]
    async fn ai_decide_bot_participates_at_most_once_per_topic() {
        // Observation 1: no record → changed → decide yes → reply.
        // Observation 2: fresh record → compare says NO (unchanged) → abort.
        let h = harness(
            &[DECIDE_YES, "My critical take.", "NO"],
            vec![slot("critic", ParticipationStrategy::AiDecide, 30)],
            OrchestratorConfig::default(),
        )
        .await;
        let channel = ChannelId::from("general");

        let q1 = h.adapter.post_user_message(&channel, "alice", "Will AI replace human jobs?");
        h.orchestrator.on_message(&channel, q1).await.into_result().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let q2 = h.adapter.post_user_message(&channel, "alice", "Will AI replace human jobs?");
        h.orchestrator.on_message(&channel, q2).await.into_result().unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let bots = bot_messages(&h.adapter, &channel).await;
        assert_eq!(bots.len(), 1, "critic must not repeat itself on the same topic");
        assert_eq!(bots[0].author, "critic");
    }

    #[tokio::test]
    async fn topic_change_allows_second_participation() {
        let h = harness(
            &[
                DECIDE_YES,
                "Take on jobs.",
                "YES", // topics differ
                DECIDE_YES,
                "Take on climate.",
            ],
            vec![slot("critic", ParticipationStrategy::AiDecide, 20)],
            OrchestratorConfig::default(),
        )
        .await;
        let channel = ChannelId::from("general");

        let q1 = h.adapter.post_user_message(&channel, "alice", "Will AI replace human jobs?");
        h.orchestrator.on_message(&channel, q1).await.into_result().unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let q2 = h.adapter.post_user_message(&channel, "alice", "How bad is climate change really?");
        h.orchestrator.on_message(&channel, q2).await.into_result().unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;

        let bots = bot_messages(&h.adapter, &channel).await;
        assert_eq!(bots.len(), 2);
    }

    #[tokio::test]
    async fn pending_observation_is_not_reset_by_newer_questions() {
        let h = harness(
            &[DECIDE_YES, "One considered reply."],
            vec![slot("thinker", ParticipationStrategy::AiDecide, 100)],
            OrchestratorConfig::default(),
        )
        .await;
        let channel = ChannelId::from("general");

        let q1 = h.adapter.post_user_message(&channel, "alice", "First question?");
        h.orchestrator.on_message(&channel, q1).await.into_result().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let q2 = h.adapter.post_user_message(&channel, "alice", "Second question?");
        h.orchestrator.on_message(&channel, q2).await.into_result().unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let bots = bot_messages(&h.adapter, &channel).await;
        assert_eq!(bots.len(), 1, "one observation window, one reply");
    }

    #[tokio::test]
    async fn full_queue_rejects_with_apology() {
        let config = OrchestratorConfig {
            queue_bound: 2,
            ..OrchestratorConfig::default()
        };
        // Long delay keeps the queue from draining during the test.
        let h = harness(
            &[],
            vec![slot("critic", ParticipationStrategy::AiDecide, 10_000)],
            config,
        )
        .await;
        let channel = ChannelId::from("general");

        for i in 0..3 {
            let msg = h.adapter.post_user_message(&channel, "alice", &format!("question {i}?"));
            h.orchestrator.on_message(&channel, msg).await.into_result().unwrap();
        }

        let bots = bot_messages(&h.adapter, &channel).await;
        assert_eq!(bots.len(), 1, "expected exactly the apology");
        assert_eq!(bots[0].content, ErrorCode::BackpressureQueueFull.user_message());

        h.orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_cancels_pending_observations() {
        let h = harness(
            &[],
            vec![slot("critic", ParticipationStrategy::AiDecide, 5_000)],
            OrchestratorConfig::default(),
        )
        .await;
        let channel = ChannelId::from("general");

        let msg = h.adapter.post_user_message(&channel, "alice", "Anyone there?");
        h.orchestrator.on_message(&channel, msg).await.into_result().unwrap();

        h.orchestrator.shutdown().await;
        assert!(bot_messages(&h.adapter, &channel).await.is_empty());

        // Further messages are rejected once shut down.
        let late = h.adapter.post_user_message(&channel, "alice", "Still there?");
        let failure = h
            .orchestrator
            .on_message(&channel, late)
            .await
            .into_result()
            .unwrap_err();
        assert_eq!(failure.code, ErrorCode::OperationCancelled);
    }

    #[tokio::test]
    async fn expert_and_observer_both_contribute_in_completion_order() {
        let h = harness(
            &["Expert answer first.", DECIDE_YES, "Critic contribution."],
            vec![
                slot("expert", ParticipationStrategy::AlwaysOnUserQuestion, 0),
                slot("critic", ParticipationStrategy::AiDecide, 40),
            ],
            OrchestratorConfig::default(),
        )
        .await;
        let channel = ChannelId::from("general");

        let msg = h.adapter.post_user_message(&channel, "alice", "Will AI replace human jobs?");
        let outcome = h
            .orchestrator
            .on_message(&channel, msg)
            .await
            .into_result()
            .unwrap()
            .unwrap();
        assert_eq!(outcome.text, "Expert answer first.");

        tokio::time::sleep(Duration::from_millis(200)).await;
        let bots = bot_messages(&h.adapter, &channel).await;
        assert_eq!(bots.len(), 2);
        assert_eq!(bots[0].author, "expert", "expert replies before the observer");
        assert_eq!(bots[1].author, "critic");
    }
}
