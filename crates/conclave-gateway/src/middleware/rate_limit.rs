use std::sync::Arc;
use std::time::Instant;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use tracing::debug;

use conclave_core::config::RateLimitConfig;
use conclave_core::error::{ErrorCode, Failure};
use conclave_core::metrics::Metrics;

use crate::app::AppState;
use crate::envelope;

/// Per-client token-bucket rate limiter with per-endpoint overrides chosen
/// by longest-prefix match on the request path.
pub struct RateLimiter {
    /// (client, rule prefix) → bucket.
    buckets: DashMap<(String, String), TokenBucket>,
    /// Overrides sorted by prefix length, longest first.
    rules: Vec<Rule>,
    default_rule: Rule,
}

#[derive(Clone)]
struct Rule {
    prefix: String,
    per_minute: u32,
    burst: u32,
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        let mut rules: Vec<Rule> = config
            .overrides
            .iter()
            .map(|o| Rule {
                prefix: o.path_prefix.clone(),
                per_minute: o.requests_per_minute,
                burst: o.burst,
            })
            .collect();
        rules.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));

        Self {
            buckets: DashMap::new(),
            rules,
            default_rule: Rule {
                prefix: String::new(),
                per_minute: config.requests_per_minute,
                burst: config.burst,
            },
        }
    }

    /// Take one token for (client, path). `Err` carries the suggested
    /// retry delay in milliseconds.
    pub fn check(&self, client: &str, path: &str) -> Result<(), u64> {
        let rule = self
            .rules
            .iter()
            .find(|r| path.starts_with(&r.prefix))
            .unwrap_or(&self.default_rule);

        let key = (client.to_string(), rule.prefix.clone());
        let mut bucket = self.buckets.entry(key).or_insert_with(|| TokenBucket {
            tokens: rule.burst as f64,
            last_refill: Instant::now(),
        });

        let per_second = rule.per_minute as f64 / 60.0;
        let elapsed = bucket.last_refill.elapsed().as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * per_second).min(rule.burst as f64);
        bucket.last_refill = Instant::now();

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let wait_ms = (((1.0 - bucket.tokens) / per_second) * 1000.0).ceil() as u64;
            Err(wait_ms.max(1))
        }
    }
}

/// Reject over-limit requests with 429 + `Retry-After`.
pub async fn enforce(State(state): State<Arc<AppState>>, req: Request, next: Next) -> Response {
    Metrics::incr(&state.metrics.requests_total);
    let client = client_key(&req);
    let path = req.uri().path().to_string();

    match state.rate_limiter.check(&client, &path) {
        Ok(()) => next.run(req).await,
        Err(retry_after_ms) => {
            Metrics::incr(&state.metrics.requests_rate_limited);
            debug!(client = %client, path = %path, "rate limit exceeded");
            envelope::failure(
                &Failure::new(ErrorCode::AuthRateLimited, "client over rate limit")
                    .with_retry_after(retry_after_ms),
            )
        }
    }
}

/// Identify the client: forwarded header first, then the socket peer,
/// then a shared fallback bucket.
fn client_key(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        return forwarded.trim().to_string();
    }
    if let Some(ConnectInfo(addr)) = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
    {
        return addr.ip().to_string();
    }
    "anonymous".to_string()
}
