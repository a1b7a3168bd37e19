use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use conclave_core::error::{ErrorCode, OperationResult};
use conclave_core::metrics::Metrics;
use conclave_provider::extract::extract_json;
use conclave_provider::{ChatMessage, RetryingClient};

use crate::skills::{SkillDescriptor, SkillRegistry};
use crate::slots::clarification_text;

/// What the router decided to do with an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteAction {
    RunSkill,
    ModelReply,
    Clarify,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteOutcome {
    pub action: RouteAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skill_input: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clarification_text: Option<String>,
    pub confidence: f32,
    pub candidates: Vec<String>,
    pub reasoning: String,
}

impl RouteOutcome {
    fn model_reply(candidates: Vec<String>, confidence: f32, reasoning: String) -> Self {
        Self {
            action: RouteAction::ModelReply,
            skill_name: None,
            skill_input: None,
            clarification_text: None,
            confidence,
            candidates,
            reasoning,
        }
    }
}

/// Two-stage intent router.
///
/// Stage A is a cheap filter: the LLM sees the user input and the skill
/// list (names and descriptions only) and returns up to three plausible
/// candidates. Stage B sees the candidates in detail and commits to one of
/// run_skill / model_reply / clarify. Stages are strictly sequential within
/// a call; concurrent `route` calls are independent.
pub struct IntentRouter {
    client: Arc<RetryingClient>,
    registry: Arc<SkillRegistry>,
    confidence_threshold: f32,
    metrics: Arc<Metrics>,
}

const MAX_CANDIDATES: usize = 3;

impl IntentRouter {
    pub fn new(
        client: Arc<RetryingClient>,
        registry: Arc<SkillRegistry>,
        confidence_threshold: f32,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            registry,
            confidence_threshold,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<SkillRegistry> {
        &self.registry
    }

    /// Classify one input. `context` is optional conversation history the
    /// decision stage may use to resolve references.
    pub async fn route(&self, input: &str, context: Option<&str>) -> OperationResult<RouteOutcome> {
        Metrics::incr(&self.metrics.intent_routes);

        let descriptors = self.registry.descriptors();
        if descriptors.is_empty() {
            return OperationResult::ok(RouteOutcome::model_reply(
                Vec::new(),
                1.0,
                "no skills registered".to_string(),
            ));
        }

        // ── Stage A: candidate generation ────────────────────────────────────
        let candidates = match self.stage_a(input, &descriptors).await {
            Ok(c) => c,
            Err(failure) => return OperationResult::Failure(failure),
        };
        if candidates.is_empty() {
            debug!("stage A returned no candidates, replying as model");
            return OperationResult::ok(RouteOutcome::model_reply(
                Vec::new(),
                1.0,
                "no plausible skill for this input".to_string(),
            ));
        }

        // ── Stage B: decision ────────────────────────────────────────────────
        let decision = match self.stage_b(input, context, &descriptors, &candidates).await {
            Ok(d) => d,
            Err(failure) => return OperationResult::Failure(failure),
        };

        self.gate(decision, candidates)
    }

    /// Look up and run a skill with the routed input.
    pub async fn execute_skill(&self, name: &str, input: &str) -> OperationResult<String> {
        let Some(skill) = self.registry.get(name) else {
            return OperationResult::fail(
                ErrorCode::SkillNotFound,
                format!("no such skill: {name}"),
            );
        };
        Metrics::incr(&self.metrics.skill_executions);
        match skill.execute(input).await {
            Ok(output) => OperationResult::ok(output),
            Err(e) => {
                warn!(skill = %name, error = %e, "skill execution failed");
                OperationResult::fail(ErrorCode::SkillExecutionFailed, e.to_string())
            }
        }
    }

    async fn stage_a(
        &self,
        input: &str,
        descriptors: &[SkillDescriptor],
    ) -> Result<Vec<String>, conclave_core::error::Failure> {
        let listing: String = descriptors
            .iter()
            .map(|d| format!("- {}: {}", d.name, d.description))
            .collect::<Vec<_>>()
            .join("\n");

        let messages = [
            ChatMessage::system(
                "You shortlist skills for a personal assistant. Given the user's input and \
                 the available skills, return JSON {\"candidates\": [\"name\", ...]} naming \
                 0 to 3 skills that could plausibly serve the request. Return an empty list \
                 when none apply — casual chat never needs a skill. JSON only.",
            ),
            ChatMessage::user(format!("Available skills:\n{listing}\n\nUser input: {input}")),
        ];

        let generation = self.client.generate(&messages, None).await.into_result()?;

        #[derive(Deserialize)]
        struct StageA {
            #[serde(default)]
            candidates: Vec<String>,
        }

        let parsed: StageA = extract_json(&generation.text).unwrap_or(StageA {
            candidates: Vec::new(),
        });

        // Only keep names that actually exist, capped at three.
        let mut candidates: Vec<String> = parsed
            .candidates
            .into_iter()
            .filter(|name| descriptors.iter().any(|d| &d.name == name))
            .collect();
        candidates.truncate(MAX_CANDIDATES);
        Ok(candidates)
    }

    async fn stage_b(
        &self,
        input: &str,
        context: Option<&str>,
        descriptors: &[SkillDescriptor],
        candidates: &[String],
    ) -> Result<StageBDecision, conclave_core::error::Failure> {
        let detail: String = descriptors
            .iter()
            .filter(|d| candidates.contains(&d.name))
            .map(|d| {
                if d.required_slots.is_empty() {
                    format!("- {}: {}", d.name, d.description)
                } else {
                    format!(
                        "- {}: {} (requires: {})",
                        d.name,
                        d.description,
                        d.required_slots.join(", ")
                    )
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let context_block = context
            .map(|c| format!("Conversation so far:\n{c}\n\n"))
            .unwrap_or_default();

        let messages = [
            ChatMessage::system(
                "You decide how a personal assistant should handle an input. Respond with \
                 JSON only: {\"action\": \"run_skill\"|\"model_reply\"|\"clarify\", \
                 \"name\": string?, \"input\": string?, \"confidence\": 0..1, \
                 \"missingSlots\": [string]?, \"reason\": string}. Choose run_skill only \
                 when one candidate clearly serves the request and every required slot \
                 value is present in the input; when a required value is missing, choose \
                 clarify and list the missing slot names.",
            ),
            ChatMessage::user(format!(
                "{context_block}Candidate skills:\n{detail}\n\nUser input: {input}"
            )),
        ];

        let generation = self.client.generate(&messages, None).await.into_result()?;

        extract_json::<StageBDecision>(&generation.text).ok_or_else(|| {
            warn!("stage B output was not parseable as a decision");
            conclave_core::error::Failure::new(
                ErrorCode::IntentNoDecision,
                "decision stage returned unparseable output",
            )
        })
    }

    /// Apply confidence gating and slot-driven degradation to a raw stage B
    /// decision.
    fn gate(
        &self,
        decision: StageBDecision,
        candidates: Vec<String>,
    ) -> OperationResult<RouteOutcome> {
        let confidence = decision.confidence.clamp(0.0, 1.0);

        match decision.action.as_str() {
            "run_skill" => {
                let Some(name) = decision.name else {
                    return OperationResult::fail(
                        ErrorCode::IntentNoDecision,
                        "run_skill decision without a skill name",
                    );
                };
                if self.registry.get(&name).is_none() {
                    return OperationResult::fail(
                        ErrorCode::SkillNotFound,
                        format!("decision named unregistered skill: {name}"),
                    );
                }
                if confidence < self.confidence_threshold {
                    debug!(
                        confidence,
                        threshold = self.confidence_threshold,
                        "confidence below gate, degrading"
                    );
                    if !decision.missing_slots.is_empty() {
                        return OperationResult::ok(RouteOutcome {
                            action: RouteAction::Clarify,
                            skill_name: Some(name),
                            skill_input: None,
                            clarification_text: Some(clarification_text(&decision.missing_slots)),
                            confidence,
                            candidates,
                            reasoning: decision.reason,
                        });
                    }
                    return OperationResult::ok(RouteOutcome::model_reply(
                        candidates,
                        confidence,
                        format!("low confidence for run_skill: {}", decision.reason),
                    ));
                }
                OperationResult::ok(RouteOutcome {
                    action: RouteAction::RunSkill,
                    skill_input: Some(decision.input.unwrap_or_default()),
                    skill_name: Some(name),
                    clarification_text: None,
                    confidence,
                    candidates,
                    reasoning: decision.reason,
                })
            }
            "clarify" => OperationResult::ok(RouteOutcome {
                action: RouteAction::Clarify,
                skill_name: decision.name,
                skill_input: None,
                clarification_text: Some(clarification_text(&decision.missing_slots)),
                confidence,
                candidates,
                reasoning: decision.reason,
            }),
            "model_reply" => OperationResult::ok(RouteOutcome::model_reply(
                candidates,
                confidence,
                decision.reason,
            )),
            other => OperationResult::fail(
                ErrorCode::IntentNoDecision,
                format!("unknown decision action: {other}"),
            ),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StageBDecision {
    action: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    confidence: f32,
    #[serde(default, rename = "missingSlots")]
    missing_slots: Vec<String>,
    #[serde(default)]
    reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skills::{FnSkill, SkillError};
    use async_trait::async_trait;
    use conclave_core::config::RetryConfig;
    use conclave_provider::{Generation, LlmProvider, ProviderError};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Returns queued responses in order; panics if exhausted.
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
                .expect("script exhausted");
            Ok(Generation {
                text,
                raw: serde_json::Value::Null,
            })
        }
    }

    fn registry_with_weather() -> Arc<SkillRegistry> {
        let registry = Arc::new(SkillRegistry::new());
        registry.register(Arc::new(FnSkill::new(
            "weather",
            "weather query for a city or region",
            vec!["location".to_string()],
            |input| async move { Ok(format!("forecast for {input}")) },
        )));
        registry
    }

    fn router(provider: Arc<dyn LlmProvider>, registry: Arc<SkillRegistry>) -> IntentRouter {
        let client = Arc::new(RetryingClient::new(provider, RetryConfig::default()));
        IntentRouter::new(client, registry, 0.72, Arc::new(Metrics::new()))
    }

    #[tokio::test]
    async fn social_chatter_routes_to_model_reply_with_zero_candidates() {
        let provider = ScriptedProvider::new(&[r#"{"candidates": []}"#]);
        let router = router(provider, registry_with_weather());

        let outcome = router.route("good morning!", None).await.into_result().unwrap();
        assert_eq!(outcome.action, RouteAction::ModelReply);
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn explicit_skill_request_routes_to_run_skill() {
        let provider = ScriptedProvider::new(&[
            r#"{"candidates": ["weather"]}"#,
            r#"{"action": "run_skill", "name": "weather", "input": "Beijing", "confidence": 0.93, "reason": "weather request with location"}"#,
        ]);
        let router = router(provider, registry_with_weather());

        let outcome = router
            .route("What's the weather in Beijing?", None)
            .await
            .into_result()
            .unwrap();
        assert_eq!(outcome.action, RouteAction::RunSkill);
        assert_eq!(outcome.skill_name.as_deref(), Some("weather"));
        assert_eq!(outcome.skill_input.as_deref(), Some("Beijing"));
        assert!(outcome.confidence >= 0.72);
        assert_eq!(outcome.candidates, vec!["weather".to_string()]);
    }

    #[tokio::test]
    async fn missing_slot_produces_clarification_naming_the_slot() {
        let provider = ScriptedProvider::new(&[
            r#"{"candidates": ["weather"]}"#,
            r#"{"action": "clarify", "name": "weather", "confidence": 0.8, "missingSlots": ["location"], "reason": "no location given"}"#,
        ]);
        let router = router(provider, registry_with_weather());

        let outcome = router
            .route("What's the weather?", None)
            .await
            .into_result()
            .unwrap();
        assert_eq!(outcome.action, RouteAction::Clarify);
        let text = outcome.clarification_text.unwrap();
        assert!(text.contains("which location"), "got: {text}");
    }

    #[tokio::test]
    async fn low_confidence_degrades_to_clarify_when_slots_missing() {
        let provider = ScriptedProvider::new(&[
            r#"{"candidates": ["weather"]}"#,
            r#"{"action": "run_skill", "name": "weather", "confidence": 0.4, "missingSlots": ["location"], "reason": "vague"}"#,
        ]);
        let router = router(provider, registry_with_weather());

        let outcome = router.route("weather maybe?", None).await.into_result().unwrap();
        assert_eq!(outcome.action, RouteAction::Clarify);
    }

    #[tokio::test]
    async fn low_confidence_degrades_to_model_reply_without_slots() {
        let provider = ScriptedProvider::new(&[
            r#"{"candidates": ["weather"]}"#,
            r#"{"action": "run_skill", "name": "weather", "input": "hm", "confidence": 0.3, "reason": "very unsure"}"#,
        ]);
        let router = router(provider, registry_with_weather());

        let outcome = router.route("hmm", None).await.into_result().unwrap();
        assert_eq!(outcome.action, RouteAction::ModelReply);
        assert!(outcome.confidence < 0.72);
    }

    #[tokio::test]
    async fn unparseable_decision_fails_with_intent_no_decision() {
        let provider = ScriptedProvider::new(&[
            r#"{"candidates": ["weather"]}"#,
            "I think probably the weather one?",
        ]);
        let router = router(provider, registry_with_weather());

        let failure = router.route("weather", None).await.into_result().unwrap_err();
        assert_eq!(failure.code, ErrorCode::IntentNoDecision);
    }

    #[tokio::test]
    async fn hallucinated_skill_name_fails_with_skill_not_found() {
        let provider = ScriptedProvider::new(&[
            r#"{"candidates": ["weather"]}"#,
            r#"{"action": "run_skill", "name": "stocks", "confidence": 0.9, "reason": "made up"}"#,
        ]);
        let router = router(provider, registry_with_weather());

        let failure = router.route("stonks", None).await.into_result().unwrap_err();
        assert_eq!(failure.code, ErrorCode::SkillNotFound);
    }

    #[tokio::test]
    async fn stage_a_garbage_is_treated_as_no_candidates() {
        let provider = ScriptedProvider::new(&["absolutely no json here"]);
        let router = router(provider, registry_with_weather());

        let outcome = router.route("hello", None).await.into_result().unwrap();
        assert_eq!(outcome.action, RouteAction::ModelReply);
        assert!(outcome.candidates.is_empty());
    }

    #[tokio::test]
    async fn empty_registry_short_circuits_without_provider_calls() {
        let provider = ScriptedProvider::new(&[]);
        let router = router(provider, Arc::new(SkillRegistry::new()));

        let outcome = router.route("anything", None).await.into_result().unwrap();
        assert_eq!(outcome.action, RouteAction::ModelReply);
    }

    #[tokio::test]
    async fn execute_skill_maps_missing_and_failing_skills() {
        let provider = ScriptedProvider::new(&[]);
        let registry = registry_with_weather();
        registry.register(Arc::new(FnSkill::new(
            "broken",
            "always fails",
            vec![],
            |_| async move { Err(SkillError::ExecutionFailed("boom".into())) },
        )));
        let router = router(provider, registry);

        let ok = router.execute_skill("weather", "Beijing").await.into_result().unwrap();
        assert_eq!(ok, "forecast for Beijing");

        let missing = router.execute_skill("nope", "x").await.into_result().unwrap_err();
        assert_eq!(missing.code, ErrorCode::SkillNotFound);

        let failed = router.execute_skill("broken", "x").await.into_result().unwrap_err();
        assert_eq!(failed.code, ErrorCode::SkillExecutionFailed);
    }
}
