use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use conclave_core::error::ErrorCode;

/// A single message in the conversation sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A completed generation: the text plus the provider's raw response body
/// for callers that need usage numbers or other provider-specific fields.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub raw: serde_json::Value,
}

/// Common interface for all LLM providers.
///
/// Implementations are stateless beyond the configured API key and safe to
/// call concurrently.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Send the conversation, wait for the full response.
    async fn generate(&self, messages: &[ChatMessage]) -> Result<Generation, ProviderError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Provider returned an empty response")]
    Empty,

    #[error("operation cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Map onto the shared error taxonomy.
    ///
    /// 401/403 → AUTH_INVALID_TOKEN; 402 or quota text → PROVIDER_QUOTA_EXCEEDED;
    /// 429 → AUTH_RATE_LIMITED; 5xx → PROVIDER_UNAVAILABLE; timeout →
    /// PROVIDER_TIMEOUT; empty text → PROVIDER_INVALID_RESPONSE.
    pub fn code(&self) -> ErrorCode {
        match self {
            ProviderError::Http(_) => ErrorCode::ProviderUnavailable,
            ProviderError::Api { status, message } => match status {
                401 | 403 => ErrorCode::AuthInvalidToken,
                402 => ErrorCode::ProviderQuotaExceeded,
                429 => ErrorCode::AuthRateLimited,
                s if *s >= 500 => ErrorCode::ProviderUnavailable,
                _ if message.to_ascii_lowercase().contains("quota") => {
                    ErrorCode::ProviderQuotaExceeded
                }
                _ => ErrorCode::ProviderInvalidResponse,
            },
            ProviderError::Parse(_) => ErrorCode::ProviderInvalidResponse,
            ProviderError::RateLimited { .. } => ErrorCode::AuthRateLimited,
            ProviderError::QuotaExceeded(_) => ErrorCode::ProviderQuotaExceeded,
            ProviderError::Timeout { .. } => ErrorCode::ProviderTimeout,
            ProviderError::Empty => ErrorCode::ProviderInvalidResponse,
            ProviderError::Cancelled => ErrorCode::OperationCancelled,
        }
    }

    /// Whether a retry on the same provider is worthwhile: only 5xx and
    /// network/timeout failures qualify.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Http(_) | ProviderError::Timeout { .. } => true,
            ProviderError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Suggested client backoff, when the provider told us.
    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimited { retry_after_ms } => Some(*retry_after_ms),
            _ => None,
        }
    }
}
