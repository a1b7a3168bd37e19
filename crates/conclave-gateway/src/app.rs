use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::routing::{get, post};
use axum::Router;
use tokio_util::sync::CancellationToken;

use conclave_channels::{ChannelAdapter, LocalChannel};
use conclave_core::config::ConclaveConfig;
use conclave_core::metrics::Metrics;
use conclave_intent::{IntentRouter, SkillRegistry};
use conclave_memory::embedding::{Embedder, EmbeddingService, HashEmbedder, RemoteEmbedder};
use conclave_memory::{MemoryEngine, VectorStore};
use conclave_orchestrator::{BotOrchestrator, OrchestratorDeps};
use conclave_provider::{LlmProvider, RetryingClient};

use crate::middleware::rate_limit::RateLimiter;

/// Central shared state — passed as `Arc<AppState>` to every handler.
/// Built once at startup; no process-global singletons.
pub struct AppState {
    pub config: ConclaveConfig,
    pub metrics: Arc<Metrics>,
    pub adapter: Arc<LocalChannel>,
    pub orchestrator: Arc<BotOrchestrator>,
    pub memory: Arc<MemoryEngine>,
    pub intent: Arc<IntentRouter>,
    pub rate_limiter: RateLimiter,
    pub started_at: Instant,
    /// Flipped to false when shutdown begins; `/readiness` reports it.
    pub ready: AtomicBool,
    /// Cancelled on shutdown — WebSocket connections watch it and close.
    pub shutdown: CancellationToken,
    pub provider_name: String,
}

/// Wire every subsystem together. The provider is injected so tests can
/// run against a scripted one.
pub async fn build_state(
    config: ConclaveConfig,
    provider: Arc<dyn LlmProvider>,
) -> anyhow::Result<Arc<AppState>> {
    let provider_name = provider.name().to_string();
    let metrics = Arc::new(Metrics::new());
    let client = Arc::new(
        RetryingClient::new(provider, config.retry.clone()).with_metrics(metrics.clone()),
    );

    let embedder: Arc<dyn Embedder> = match &config.providers.embedding {
        Some(e) => Arc::new(RemoteEmbedder::new(
            e.api_key.clone(),
            e.base_url.clone(),
            e.model.clone(),
            config.memory.embedding_dim,
        )),
        None => Arc::new(HashEmbedder::new(config.memory.embedding_dim)),
    };
    let embeddings = Arc::new(EmbeddingService::new(
        embedder,
        Duration::from_secs(config.memory.embed_cache_ttl_secs),
    ));
    let store = VectorStore::open(config.memory.clone(), embeddings).await?;
    let memory = Arc::new(MemoryEngine::new(store, client.clone(), metrics.clone()));

    let registry = Arc::new(SkillRegistry::new());
    let intent = Arc::new(IntentRouter::new(
        client.clone(),
        registry,
        config.intent.confidence_threshold,
        metrics.clone(),
    ));

    let adapter = Arc::new(LocalChannel::default());
    let adapter_dyn: Arc<dyn ChannelAdapter> = adapter.clone();
    let deps = OrchestratorDeps {
        adapter: adapter_dyn,
        client: client.clone(),
        intent: intent.clone(),
        memory: Some(memory.clone()),
        metrics: metrics.clone(),
    };
    let orchestrator = BotOrchestrator::start(config.orchestrator.clone(), &config.bots, deps).await;

    let rate_limiter = RateLimiter::from_config(&config.gateway.rate_limit);

    Ok(Arc::new(AppState {
        metrics,
        adapter,
        orchestrator,
        memory,
        intent,
        rate_limiter,
        started_at: Instant::now(),
        ready: AtomicBool::new(true),
        shutdown: CancellationToken::new(),
        provider_name,
        config,
    }))
}

/// Assemble the full router. Layer order (outermost first): concurrency
/// cap → trace-id injection → CORS → admin auth → rate limiting → body
/// cap + JSON validation → handler.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = crate::middleware::cors::layer(&state.config.gateway);

    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route("/readiness", get(crate::http::health::readiness_handler))
        .route("/chat", post(crate::http::chat::chat_handler))
        .route("/memory/search", post(crate::http::memory::search_handler))
        .route("/memory/update", post(crate::http::memory::update_handler))
        .route("/admin/metrics", get(crate::http::admin::metrics_handler))
        .route("/admin/skills", get(crate::http::admin::skills_handler))
        .route("/admin/cleanup", post(crate::http::admin::cleanup_handler))
        .route("/ws", get(crate::ws::connection::ws_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::validate::validate_body,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::rate_limit::enforce,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::middleware::auth::admin_gate,
        ))
        .layer(cors)
        .layer(axum::middleware::from_fn(crate::middleware::trace::inject))
        .layer(tower::limit::ConcurrencyLimitLayer::new(
            state.config.gateway.max_concurrent_requests,
        ))
        .with_state(state)
}
