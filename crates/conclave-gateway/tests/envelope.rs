//! End-to-end tests of the HTTP surface: envelope shape, middleware
//! behavior, and the chat/memory paths, driven through the router with no
//! real network or LLM.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;

use conclave_core::config::{
    AnthropicConfig, BotSlotConfig, ConclaveConfig, ParticipationStrategy, RateLimitOverride,
};
use conclave_gateway::app::{build_router, build_state, AppState};
use conclave_provider::{ChatMessage, Generation, LlmProvider, ProviderError};

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
            .expect("provider script exhausted — a handler made an unexpected LLM call");
        Ok(Generation {
            text,
            raw: Value::Null,
        })
    }
}

fn test_config(dir: &std::path::Path) -> ConclaveConfig {
    let mut config = ConclaveConfig::default();
    config.gateway.admin_token = Some("s3cret-admin".to_string());
    config.gateway.max_request_body_bytes = 64 * 1024;
    config.memory.dir = dir.join("memory").display().to_string();
    config.memory.sessions_dir = dir.join("sessions").display().to_string();
    config.memory.embedding_dim = 128;
    config.providers.anthropic = Some(AnthropicConfig {
        api_key: "sk-test".to_string(),
        base_url: "https://api.anthropic.com".to_string(),
        model: "claude-sonnet-4-5".to_string(),
    });
    config.bots.push(BotSlotConfig {
        name: "expert".to_string(),
        role_description: "The knowledgeable lead of this channel.".to_string(),
        strategy: ParticipationStrategy::AlwaysOnUserQuestion,
        observation_delay_ms: 0,
        decision_prompt: None,
        max_observation_messages: 20,
        channels: Vec::new(),
    });
    config
}

async fn harness_with(
    config: ConclaveConfig,
    script: &[&str],
) -> (Router, Arc<AppState>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = config;
    if config.memory.dir.is_empty() {
        config.memory.dir = tmp.path().join("memory").display().to_string();
    }
    let state = build_state(config, ScriptedProvider::new(script)).await.unwrap();
    (build_router(state.clone()), state, tmp)
}

async fn harness(script: &[&str]) -> (Router, Arc<AppState>, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let config = test_config(tmp.path());
    let state = build_state(config, ScriptedProvider::new(script)).await.unwrap();
    (build_router(state.clone()), state, tmp)
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn admin_without_token_gets_401_envelope_with_trace_id() {
    let (router, _state, _tmp) = harness(&[]).await;

    let response = router.oneshot(get("/admin/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(
        response.headers().contains_key("x-trace-id"),
        "every response carries a trace id"
    );

    let body = body_json(response).await;
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "AUTH_INVALID_TOKEN");
}

#[tokio::test]
async fn admin_with_bearer_token_succeeds() {
    let (router, _state, _tmp) = harness(&[]).await;

    let request = Request::builder()
        .method("GET")
        .uri("/admin/metrics")
        .header("authorization", "Bearer s3cret-admin")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn oversized_body_is_rejected_before_any_handler() {
    // The empty script panics on any provider call — reaching the handler
    // would fail the test.
    let (router, _state, _tmp) = harness(&[]).await;

    let huge = "x".repeat(128 * 1024);
    let request = Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(format!("{{\"message\": \"{huge}\"}}")))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INPUT_TOO_LARGE");
}

#[tokio::test]
async fn chat_returns_reply_with_metadata() {
    let (router, _state, _tmp) = harness(&["The answer is 4."]).await;

    let response = router
        .oneshot(post("/chat", json!({ "message": "What is 2+2?", "user_id": "alice" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["ok"], true);
    assert!(body["output"].as_str().unwrap().contains('4'));
    assert_eq!(body["metadata"]["source"], "model_reply");
    assert_eq!(
        body["metadata"]["sessionKey"],
        "user:alice|channel:webchat"
    );
}

#[tokio::test]
async fn chat_without_message_field_is_a_validation_error() {
    let (router, _state, _tmp) = harness(&[]).await;

    let response = router
        .oneshot(post("/chat", json!({ "user_id": "alice" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "INPUT_VALIDATION_FAILED");
    let fields = body["error"]["fields"].as_array().unwrap();
    assert!(fields.iter().any(|f| f["field"] == "message"));
}

#[tokio::test]
async fn rate_limited_request_gets_429_with_retry_after() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.gateway.rate_limit.overrides.push(RateLimitOverride {
        path_prefix: "/memory/search".to_string(),
        requests_per_minute: 60,
        burst: 5,
    });
    let (router, _state, _tmp) = harness_with(config, &[]).await;

    let body = json!({ "user_id": "alice", "query": "tea" });
    for _ in 0..5 {
        let response = router
            .clone()
            .oneshot(post("/memory/search", body.clone()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let response = router.oneshot(post("/memory/search", body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("retry-after"));

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTH_RATE_LIMITED");
    assert_eq!(body["error"]["retryable"], true);
}

#[tokio::test]
async fn supplied_trace_id_is_echoed() {
    let (router, _state, _tmp) = harness(&[]).await;

    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .header("x-trace-id", "feedface00112233")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(
        response.headers().get("x-trace-id").unwrap(),
        "feedface00112233"
    );
}

#[tokio::test]
async fn memory_update_then_search_roundtrips() {
    let (router, _state, _tmp) = harness(&[]).await;

    let update = router
        .clone()
        .oneshot(post(
            "/memory/update",
            json!({
                "user_id": "alice",
                "content": "favorite drink is green tea",
                "kind": "profile",
                "importance": 0.9,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(update.status(), StatusCode::OK);
    let update_body = body_json(update).await;
    let memory_id = update_body["output"]["memoryId"].as_str().unwrap().to_string();
    assert!(memory_id.starts_with("mem_"));

    let search = router
        .oneshot(post(
            "/memory/search",
            json!({ "user_id": "alice", "query": "green tea drink" }),
        ))
        .await
        .unwrap();
    assert_eq!(search.status(), StatusCode::OK);
    let search_body = body_json(search).await;
    let results = search_body["output"]["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0]["memoryId"], memory_id.as_str());
}

#[tokio::test]
async fn invalid_lifecycle_kind_is_rejected() {
    let (router, _state, _tmp) = harness(&[]).await;

    let response = router
        .oneshot(post(
            "/memory/update",
            json!({ "user_id": "alice", "content": "x", "kind": "forever" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn health_and_readiness_report_state() {
    let (router, state, _tmp) = harness(&[]).await;

    let health = router.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);
    let health_body = body_json(health).await;
    assert_eq!(health_body["ok"], true);
    assert!(health_body["output"]["version"].is_string());
    assert_eq!(health_body["output"]["componentMap"]["provider"], "scripted");

    let ready = router.clone().oneshot(get("/readiness")).await.unwrap();
    assert_eq!(ready.status(), StatusCode::OK);

    // Once shutdown begins, readiness flips to 503.
    state.ready.store(false, std::sync::atomic::Ordering::Release);
    let draining = router.oneshot(get("/readiness")).await.unwrap();
    assert_eq!(draining.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn disabled_admin_surface_returns_403() {
    let tmp = tempfile::tempdir().unwrap();
    let mut config = test_config(tmp.path());
    config.gateway.admin_token = None;
    config.gateway.disable_admin = true;
    let (router, _state, _tmp) = harness_with(config, &[]).await;

    let request = Request::builder()
        .method("GET")
        .uri("/admin/metrics")
        .header("authorization", "Bearer anything")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}
