use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use conclave_core::config::RetryConfig;
use conclave_core::error::{Failure, OperationResult};
use conclave_core::metrics::Metrics;
use conclave_core::trace::TraceId;

use crate::provider::{ChatMessage, Generation, LlmProvider, ProviderError};

/// Wraps a provider with per-attempt timeout, linear backoff, and mapping
/// into the shared error taxonomy.
///
/// Only transient failures (5xx, network, timeout) are retried; 4xx and
/// content-policy errors surface immediately. The trace id travels through
/// the task-local scope, so log lines here carry it without an explicit
/// parameter.
pub struct RetryingClient {
    provider: Arc<dyn LlmProvider>,
    config: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl RetryingClient {
    pub fn new(provider: Arc<dyn LlmProvider>, config: RetryConfig) -> Self {
        Self {
            provider,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// Generate a completion, retrying transient failures up to
    /// `max_attempts` with linear backoff (`backoff_step_ms * attempt`).
    pub async fn generate(
        &self,
        messages: &[ChatMessage],
        cancel: Option<&CancellationToken>,
    ) -> OperationResult<Generation> {
        let cancel = cancel.cloned().unwrap_or_default();
        let provider_name = self.provider.name();
        let mut last_err: Option<ProviderError> = None;

        for attempt in 1..=self.config.max_attempts {
            if attempt > 1 {
                let backoff = Duration::from_millis(
                    self.config.backoff_step_ms * u64::from(attempt - 1),
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return cancelled_failure(provider_name);
                    }
                    _ = tokio::time::sleep(backoff) => {}
                }
                if let Some(m) = &self.metrics {
                    Metrics::incr(&m.provider_retries);
                }
            }

            if let Some(m) = &self.metrics {
                Metrics::incr(&m.provider_calls);
            }

            let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    return cancelled_failure(provider_name);
                }
                res = tokio::time::timeout(attempt_timeout, self.provider.generate(messages)) => res,
            };

            let err = match outcome {
                Ok(Ok(generation)) => {
                    if attempt > 1 {
                        info!(
                            provider = %provider_name,
                            attempt,
                            trace_id = ?TraceId::current(),
                            "generation succeeded after retry"
                        );
                    }
                    return OperationResult::ok(generation);
                }
                Ok(Err(e)) => e,
                Err(_) => ProviderError::Timeout {
                    ms: self.config.attempt_timeout_ms,
                },
            };

            warn!(
                provider = %provider_name,
                attempt,
                max = self.config.max_attempts,
                err = %err,
                trace_id = ?TraceId::current(),
                "provider generate failed"
            );

            if !err.is_transient() {
                return self.map_failure(err);
            }
            last_err = Some(err);
        }

        self.map_failure(last_err.unwrap_or(ProviderError::Empty))
    }

    fn map_failure(&self, err: ProviderError) -> OperationResult<Generation> {
        if let Some(m) = &self.metrics {
            Metrics::incr(&m.provider_failures);
        }
        let mut failure = Failure::new(err.code(), format!("{}: {}", self.provider.name(), err));
        if let Some(ms) = err.retry_after_ms() {
            failure = failure.with_retry_after(ms);
        }
        OperationResult::Failure(failure)
    }
}

fn cancelled_failure(provider: &str) -> OperationResult<Generation> {
    OperationResult::Failure(Failure::new(
        ProviderError::Cancelled.code(),
        format!("{provider}: generation cancelled"),
    ))
}
