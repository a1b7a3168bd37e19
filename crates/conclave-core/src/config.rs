use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

pub const DEFAULT_PORT: u16 = 18990;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Per-channel pending queue bound.
pub const DEFAULT_QUEUE_BOUND: usize = 100;
/// Per-bot concurrent message processing limit.
pub const DEFAULT_WORKER_LIMIT: usize = 5;
/// Participation records older than this are treated as expired.
pub const DEFAULT_PARTICIPATION_MAX_AGE_SECS: u64 = 3600;
/// Queue entries older than this are garbage-collected on enqueue.
pub const QUEUE_ENTRY_TTL_SECS: u64 = 300;

/// Top-level config (conclave.toml + CONCLAVE_* env overrides + the
/// well-known unprefixed env vars recognized for deployment).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConclaveConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub intent: IntentConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub bots: Vec<BotSlotConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Required unless `disable_admin` is set — checked by `validate()`.
    pub admin_token: Option<String>,
    #[serde(default)]
    pub disable_admin: bool,
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    #[serde(default = "default_body_limit")]
    pub max_request_body_bytes: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Timeout for everything except /chat.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Timeout for /chat — chunked streaming may exceed it.
    #[serde(default = "default_chat_timeout_ms")]
    pub chat_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            admin_token: None,
            disable_admin: false,
            cors_allowed_origins: Vec::new(),
            max_request_body_bytes: default_body_limit(),
            max_concurrent_requests: default_max_concurrent(),
            request_timeout_ms: default_request_timeout_ms(),
            chat_timeout_ms: default_chat_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Token-bucket rate limiting. `overrides` win over the global default by
/// longest-prefix match on the request path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_rpm")]
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
    #[serde(default)]
    pub overrides: Vec<RateLimitOverride>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_rpm(),
            burst: default_burst(),
            overrides: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitOverride {
    /// Path prefix, e.g. "/chat" or "/memory".
    pub path_prefix: String,
    pub requests_per_minute: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProvidersConfig {
    pub anthropic: Option<AnthropicConfig>,
    pub openai: Option<OpenAiConfig>,
    /// Embedding endpoint; absent means the deterministic fallback is used.
    pub embedding: Option<EmbeddingApiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    pub api_key: String,
    #[serde(default = "default_anthropic_base_url")]
    pub base_url: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingApiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
}

/// Retry behavior for provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Linear backoff: sleep `backoff_step_ms * attempt` between attempts.
    #[serde(default = "default_backoff_step_ms")]
    pub backoff_step_ms: u64,
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_step_ms: default_backoff_step_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_memory_dir")]
    pub dir: String,
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,
    #[serde(default = "default_embed_cache_ttl_secs")]
    pub embed_cache_ttl_secs: u64,
    #[serde(default = "default_max_vectors_per_user")]
    pub max_vectors_per_user: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            dir: default_memory_dir(),
            sessions_dir: default_sessions_dir(),
            save_debounce_ms: default_save_debounce_ms(),
            embedding_dim: default_embedding_dim(),
            embed_cache_ttl_secs: default_embed_cache_ttl_secs(),
            max_vectors_per_user: default_max_vectors_per_user(),
            similarity_threshold: default_similarity_threshold(),
            search_limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// `run_skill` decisions below this confidence degrade to clarify or
    /// model_reply. Process-wide — never adapted per input.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    #[serde(default = "default_participation_max_age_secs")]
    pub participation_max_age_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            queue_bound: default_queue_bound(),
            worker_limit: default_worker_limit(),
            participation_max_age_secs: default_participation_max_age_secs(),
        }
    }
}

/// How a bot decides to join a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ParticipationStrategy {
    /// Reply immediately to every new human question (the lead bot).
    #[default]
    AlwaysOnUserQuestion,
    /// Observe for a delay, then let the LLM decide whether to join.
    AiDecide,
}

impl std::str::FromStr for ParticipationStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "always_on_user_question" | "always" => Ok(Self::AlwaysOnUserQuestion),
            "ai_decide" | "ai" => Ok(Self::AiDecide),
            other => Err(format!("unknown participation strategy: {other}")),
        }
    }
}

/// One configured bot slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotSlotConfig {
    pub name: String,
    /// Natural-language role description fed verbatim into prompts.
    pub role_description: String,
    #[serde(default)]
    pub strategy: ParticipationStrategy,
    /// 0 means "ask the LLM at startup".
    #[serde(default)]
    pub observation_delay_ms: u64,
    /// Optional template for the participation decision prompt.
    #[serde(default)]
    pub decision_prompt: Option<String>,
    #[serde(default = "default_max_observation_messages")]
    pub max_observation_messages: usize,
    /// Channels this bot listens on.
    #[serde(default)]
    pub channels: Vec<String>,
}

impl ConclaveConfig {
    /// Load from a TOML file with `CONCLAVE_*` env overrides, then apply the
    /// well-known deployment env vars (ADMIN_TOKEN, MEMORY_DIR, BOT_1_NAME,
    /// …). Call `validate()` before using the result.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let mut config: ConclaveConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CONCLAVE_").split("__"))
            .extract()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        config.apply_well_known_env()?;
        Ok(config)
    }

    /// Overlay the unprefixed env vars recognized for deployment. Numeric
    /// parse failures are boot errors, never silently defaulted.
    fn apply_well_known_env(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var("ADMIN_TOKEN") {
            self.gateway.admin_token = Some(v);
        }
        if let Ok(v) = std::env::var("DISABLE_ADMIN") {
            self.gateway.disable_admin = parse_env_bool("DISABLE_ADMIN", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_REQUEST_BODY_SIZE") {
            self.gateway.max_request_body_bytes = parse_env_num("MAX_REQUEST_BODY_SIZE", &v)?;
        }
        if let Ok(v) = std::env::var("MAX_CONCURRENT_REQUESTS") {
            self.gateway.max_concurrent_requests = parse_env_num("MAX_CONCURRENT_REQUESTS", &v)?;
        }
        if let Ok(v) = std::env::var("REQUEST_TIMEOUT_MS") {
            self.gateway.request_timeout_ms = parse_env_num("REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Ok(v) = std::env::var("CORS_ALLOWED_ORIGINS") {
            self.gateway.cors_allowed_origins =
                v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = std::env::var("MEMORY_DIR") {
            self.memory.dir = v;
        }
        if let Ok(v) = std::env::var("SESSIONS_DIR") {
            self.memory.sessions_dir = v;
        }
        if let Ok(v) = std::env::var("ANTHROPIC_API_KEY") {
            let entry = self.providers.anthropic.get_or_insert_with(|| AnthropicConfig {
                api_key: String::new(),
                base_url: default_anthropic_base_url(),
                model: default_anthropic_model(),
            });
            entry.api_key = v;
        }
        if let Ok(v) = std::env::var("OPENAI_API_KEY") {
            let entry = self.providers.openai.get_or_insert_with(|| OpenAiConfig {
                api_key: String::new(),
                base_url: default_openai_base_url(),
                model: default_openai_model(),
            });
            entry.api_key = v;
        }

        self.apply_bot_slots_env()?;
        Ok(())
    }

    /// Read numbered bot slots: BOT_1_NAME, BOT_1_ROLE, BOT_1_STRATEGY,
    /// BOT_1_DELAY_MS, BOT_1_CHANNELS, BOT_2_…. Stops at the first missing
    /// slot number.
    fn apply_bot_slots_env(&mut self) -> Result<()> {
        for n in 1u32.. {
            let Ok(name) = std::env::var(format!("BOT_{n}_NAME")) else {
                break;
            };
            let role = std::env::var(format!("BOT_{n}_ROLE"))
                .or_else(|_| std::env::var(format!("ROLE_{n}_DESCRIPTION")))
                .map_err(|_| {
                    CoreError::Config(format!("BOT_{n}_NAME set but BOT_{n}_ROLE missing"))
                })?;
            let strategy = match std::env::var(format!("BOT_{n}_STRATEGY")) {
                Ok(s) => s
                    .parse::<ParticipationStrategy>()
                    .map_err(CoreError::Config)?,
                Err(_) => ParticipationStrategy::default(),
            };
            let observation_delay_ms = match std::env::var(format!("BOT_{n}_DELAY_MS")) {
                Ok(s) => parse_env_num(&format!("BOT_{n}_DELAY_MS"), &s)?,
                Err(_) => 0,
            };
            let channels = std::env::var(format!("BOT_{n}_CHANNELS"))
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();

            self.bots.push(BotSlotConfig {
                name,
                role_description: role,
                strategy,
                observation_delay_ms,
                decision_prompt: None,
                max_observation_messages: default_max_observation_messages(),
                channels,
            });
        }
        Ok(())
    }

    /// Check every numeric range and the admin-token boot rule. Any error
    /// here must block startup.
    pub fn validate(&self) -> Result<()> {
        let g = &self.gateway;
        if g.port == 0 {
            return Err(CoreError::Config("gateway.port must be non-zero".into()));
        }
        if !g.disable_admin && g.admin_token.as_deref().map_or(true, |t| t.is_empty()) {
            return Err(CoreError::Config(
                "ADMIN_TOKEN is required unless DISABLE_ADMIN=true".into(),
            ));
        }
        check_range(
            "gateway.max_request_body_bytes",
            g.max_request_body_bytes as u64,
            1024,
            1 << 30,
        )?;
        check_range(
            "gateway.max_concurrent_requests",
            g.max_concurrent_requests as u64,
            1,
            100_000,
        )?;
        check_range("gateway.request_timeout_ms", g.request_timeout_ms, 100, 3_600_000)?;
        check_range("gateway.chat_timeout_ms", g.chat_timeout_ms, 100, 3_600_000)?;
        check_range("gateway.rate_limit.requests_per_minute", g.rate_limit.requests_per_minute as u64, 1, 1_000_000)?;
        for o in &g.rate_limit.overrides {
            if !o.path_prefix.starts_with('/') {
                return Err(CoreError::Config(format!(
                    "rate limit override path must start with '/': {}",
                    o.path_prefix
                )));
            }
            check_range("rate limit override rpm", o.requests_per_minute as u64, 1, 1_000_000)?;
        }

        check_range("retry.max_attempts", self.retry.max_attempts as u64, 1, 10)?;
        check_range("retry.attempt_timeout_ms", self.retry.attempt_timeout_ms, 100, 600_000)?;

        let m = &self.memory;
        check_range("memory.embedding_dim", m.embedding_dim as u64, 8, 8192)?;
        check_range("memory.max_vectors_per_user", m.max_vectors_per_user as u64, 10, 10_000_000)?;
        check_unit_interval("memory.similarity_threshold", m.similarity_threshold)?;
        check_range("memory.search_limit", m.search_limit as u64, 1, 1000)?;

        check_unit_interval("intent.confidence_threshold", self.intent.confidence_threshold)?;

        let o = &self.orchestrator;
        check_range("orchestrator.queue_bound", o.queue_bound as u64, 1, 100_000)?;
        check_range("orchestrator.worker_limit", o.worker_limit as u64, 1, 1024)?;

        for bot in &self.bots {
            if bot.name.trim().is_empty() {
                return Err(CoreError::Config("bot name must not be empty".into()));
            }
            if bot.role_description.trim().is_empty() {
                return Err(CoreError::Config(format!(
                    "bot '{}' has an empty role description",
                    bot.name
                )));
            }
            check_range(
                &format!("bot '{}' observation_delay_ms", bot.name),
                bot.observation_delay_ms,
                0,
                60_000,
            )?;
        }
        Ok(())
    }
}

fn check_range(name: &str, value: u64, min: u64, max: u64) -> Result<()> {
    if value < min || value > max {
        return Err(CoreError::Config(format!(
            "{name} = {value} is outside the allowed range [{min}, {max}]"
        )));
    }
    Ok(())
}

fn check_unit_interval(name: &str, value: f32) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(CoreError::Config(format!(
            "{name} = {value} must be within [0, 1]"
        )));
    }
    Ok(())
}

fn parse_env_num<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| CoreError::Config(format!("{name}={raw} is not a valid number")))
}

fn parse_env_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(CoreError::Config(format!(
            "{name}={raw} is not a valid boolean"
        ))),
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_body_limit() -> usize {
    10 * (1 << 20)
}
fn default_max_concurrent() -> usize {
    100
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_chat_timeout_ms() -> u64 {
    300_000
}
fn default_shutdown_grace_ms() -> u64 {
    5_000
}
fn default_rpm() -> u32 {
    120
}
fn default_burst() -> u32 {
    20
}
fn default_anthropic_base_url() -> String {
    "https://api.anthropic.com".to_string()
}
fn default_anthropic_model() -> String {
    "claude-sonnet-4-5".to_string()
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_max_attempts() -> u32 {
    2
}
fn default_backoff_step_ms() -> u64 {
    350
}
fn default_attempt_timeout_ms() -> u64 {
    20_000
}
fn default_memory_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.conclave/sessions/memory")
}
fn default_sessions_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.conclave/sessions")
}
fn default_save_debounce_ms() -> u64 {
    10_000
}
fn default_embedding_dim() -> usize {
    256
}
fn default_embed_cache_ttl_secs() -> u64 {
    3600
}
fn default_max_vectors_per_user() -> usize {
    10_000
}
fn default_similarity_threshold() -> f32 {
    0.3
}
fn default_search_limit() -> usize {
    10
}
fn default_confidence_threshold() -> f32 {
    0.72
}
fn default_queue_bound() -> usize {
    DEFAULT_QUEUE_BOUND
}
fn default_worker_limit() -> usize {
    DEFAULT_WORKER_LIMIT
}
fn default_participation_max_age_secs() -> u64 {
    DEFAULT_PARTICIPATION_MAX_AGE_SECS
}
fn default_max_observation_messages() -> usize {
    20
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.conclave/conclave.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ConclaveConfig {
        let mut config = ConclaveConfig::default();
        config.gateway.admin_token = Some("secret".to_string());
        config
    }

    #[test]
    fn default_config_with_admin_token_validates() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn missing_admin_token_blocks_boot() {
        let config = ConclaveConfig::default();
        assert!(config.validate().is_err());

        let mut disabled = ConclaveConfig::default();
        disabled.gateway.disable_admin = true;
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn out_of_range_numerics_are_rejected() {
        let mut config = valid_config();
        config.intent.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.memory.embedding_dim = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn bot_slot_requires_role_description() {
        let mut config = valid_config();
        config.bots.push(BotSlotConfig {
            name: "critic".to_string(),
            role_description: "  ".to_string(),
            strategy: ParticipationStrategy::AiDecide,
            observation_delay_ms: 0,
            decision_prompt: None,
            max_observation_messages: 20,
            channels: vec!["general".to_string()],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn strategy_parses_from_config_strings() {
        assert_eq!(
            "ai_decide".parse::<ParticipationStrategy>().unwrap(),
            ParticipationStrategy::AiDecide
        );
        assert!("sometimes".parse::<ParticipationStrategy>().is_err());
    }
}
