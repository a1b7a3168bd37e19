use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Machine-readable error code attached to every failure that crosses a
/// module boundary. The code decides the HTTP status, whether a retry is
/// worthwhile, and which pre-authored message the end user sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ConfigInvalid,
    InputValidationFailed,
    InputTooLarge,
    AuthInvalidToken,
    AuthForbidden,
    AuthRateLimited,
    ProviderUnavailable,
    ProviderTimeout,
    ProviderQuotaExceeded,
    ProviderInvalidResponse,
    IntentNoDecision,
    IntentLowConfidence,
    SkillNotFound,
    SkillExecutionFailed,
    MemoryConflict,
    MemoryCorrupted,
    BackpressureQueueFull,
    OperationCancelled,
    SystemInternal,
}

impl ErrorCode {
    /// Wire-format code string, e.g. `"PROVIDER_TIMEOUT"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "CONFIG_INVALID",
            ErrorCode::InputValidationFailed => "INPUT_VALIDATION_FAILED",
            ErrorCode::InputTooLarge => "INPUT_TOO_LARGE",
            ErrorCode::AuthInvalidToken => "AUTH_INVALID_TOKEN",
            ErrorCode::AuthForbidden => "AUTH_FORBIDDEN",
            ErrorCode::AuthRateLimited => "AUTH_RATE_LIMITED",
            ErrorCode::ProviderUnavailable => "PROVIDER_UNAVAILABLE",
            ErrorCode::ProviderTimeout => "PROVIDER_TIMEOUT",
            ErrorCode::ProviderQuotaExceeded => "PROVIDER_QUOTA_EXCEEDED",
            ErrorCode::ProviderInvalidResponse => "PROVIDER_INVALID_RESPONSE",
            ErrorCode::IntentNoDecision => "INTENT_NO_DECISION",
            ErrorCode::IntentLowConfidence => "INTENT_LOW_CONFIDENCE",
            ErrorCode::SkillNotFound => "SKILL_NOT_FOUND",
            ErrorCode::SkillExecutionFailed => "SKILL_EXECUTION_FAILED",
            ErrorCode::MemoryConflict => "MEMORY_CONFLICT",
            ErrorCode::MemoryCorrupted => "MEMORY_CORRUPTED",
            ErrorCode::BackpressureQueueFull => "BACKPRESSURE_QUEUE_FULL",
            ErrorCode::OperationCancelled => "OPERATION_CANCELLED",
            ErrorCode::SystemInternal => "SYSTEM_INTERNAL",
        }
    }

    /// HTTP status this code maps to in the gateway envelope.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ConfigInvalid => 500,
            ErrorCode::InputValidationFailed => 400,
            ErrorCode::InputTooLarge => 413,
            ErrorCode::AuthInvalidToken => 401,
            ErrorCode::AuthForbidden => 403,
            ErrorCode::AuthRateLimited => 429,
            ErrorCode::ProviderUnavailable => 503,
            ErrorCode::ProviderTimeout => 504,
            ErrorCode::ProviderQuotaExceeded => 503,
            ErrorCode::ProviderInvalidResponse => 502,
            ErrorCode::IntentNoDecision => 200,
            ErrorCode::IntentLowConfidence => 200,
            ErrorCode::SkillNotFound => 404,
            ErrorCode::SkillExecutionFailed => 500,
            ErrorCode::MemoryConflict => 409,
            ErrorCode::MemoryCorrupted => 500,
            ErrorCode::BackpressureQueueFull => 429,
            ErrorCode::OperationCancelled => 499,
            ErrorCode::SystemInternal => 500,
        }
    }

    /// Whether the caller may reasonably retry the same request.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::AuthRateLimited
                | ErrorCode::ProviderUnavailable
                | ErrorCode::ProviderTimeout
                | ErrorCode::ProviderQuotaExceeded
                | ErrorCode::BackpressureQueueFull
        )
    }

    /// Short, non-technical message shown to end users. Internal detail
    /// stays in `Failure::message` and the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalid => "The assistant is misconfigured. Please contact the operator.",
            ErrorCode::InputValidationFailed => "That request was missing something or malformed.",
            ErrorCode::InputTooLarge => "That message is too large for me to process.",
            ErrorCode::AuthInvalidToken => "I couldn't verify your credentials.",
            ErrorCode::AuthForbidden => "You don't have permission to do that.",
            ErrorCode::AuthRateLimited => "You're sending messages a little too fast. Give me a moment.",
            ErrorCode::ProviderUnavailable => "My language model is unreachable right now. Please try again shortly.",
            ErrorCode::ProviderTimeout => "That took too long to think about. Please try again.",
            ErrorCode::ProviderQuotaExceeded => "I've run out of model quota for now.",
            ErrorCode::ProviderInvalidResponse => "I received a garbled answer from my language model.",
            ErrorCode::IntentNoDecision => "I'm not sure what you mean; let me reply conversationally instead.",
            ErrorCode::IntentLowConfidence => "I'm not sure what you mean; let me reply conversationally instead.",
            ErrorCode::SkillNotFound => "I don't know how to do that yet.",
            ErrorCode::SkillExecutionFailed => "Something went wrong while running that for you.",
            ErrorCode::MemoryConflict => "I couldn't reconcile that with what I already remember.",
            ErrorCode::MemoryCorrupted => "My memory store hit an internal problem.",
            ErrorCode::BackpressureQueueFull => "I'm handling a lot of messages right now — please try again in a minute.",
            ErrorCode::OperationCancelled => "That request was cancelled.",
            ErrorCode::SystemInternal => "Something went wrong on my side.",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The failure half of [`OperationResult`]. Carries everything a handler
/// needs to build the external error envelope without consulting the source
/// of the failure again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub code: ErrorCode,
    /// Developer-facing detail. Never shown to end users.
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    /// Pre-authored short message safe to show to end users.
    pub user_message: String,
}

impl Failure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: code.retryable(),
            retry_after_ms: None,
            user_message: code.user_message().to_string(),
        }
    }

    pub fn with_retry_after(mut self, ms: u64) -> Self {
        self.retry_after_ms = Some(ms);
        self
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for Failure {}

/// Uniform success/failure envelope returned by every externally observable
/// operation. `Success` carries free-form metadata (source, skill name,
/// confidence, …) so handlers can enrich responses without widening `T`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OperationResult<T> {
    Success {
        value: T,
        #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
        metadata: serde_json::Map<String, serde_json::Value>,
    },
    Failure(Failure),
}

impl<T> OperationResult<T> {
    pub fn ok(value: T) -> Self {
        OperationResult::Success {
            value,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn ok_with(value: T, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        OperationResult::Success { value, metadata }
    }

    pub fn fail(code: ErrorCode, message: impl Into<String>) -> Self {
        OperationResult::Failure(Failure::new(code, message))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, OperationResult::Success { .. })
    }

    /// Convert into a plain `Result`, dropping success metadata.
    pub fn into_result(self) -> std::result::Result<T, Failure> {
        match self {
            OperationResult::Success { value, .. } => Ok(value),
            OperationResult::Failure(f) => Err(f),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OperationResult<U> {
        match self {
            OperationResult::Success { value, metadata } => OperationResult::Success {
                value: f(value),
                metadata,
            },
            OperationResult::Failure(e) => OperationResult::Failure(e),
        }
    }
}

impl<T> From<Failure> for OperationResult<T> {
    fn from(f: Failure) -> Self {
        OperationResult::Failure(f)
    }
}

/// Errors raised by the core crate itself (configuration loading and
/// session-key parsing). Mapped into [`ErrorCode`] at the boundary.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid session key: {0}")]
    InvalidSessionKey(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Config(_) => ErrorCode::ConfigInvalid,
            CoreError::InvalidSessionKey(_) => ErrorCode::InputValidationFailed,
            CoreError::Serialization(_) => ErrorCode::SystemInternal,
            CoreError::Io(_) => ErrorCode::SystemInternal,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
