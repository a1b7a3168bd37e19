//! LLM provider layer: a common `generate(messages) → text` interface over
//! Anthropic and OpenAI, a retry/timeout wrapper with structured error
//! mapping, and tolerant extraction of JSON from model output.

pub mod anthropic;
pub mod extract;
pub mod openai;
pub mod provider;
pub mod retry;

pub use provider::{ChatMessage, Generation, LlmProvider, ProviderError, Role};
pub use retry::RetryingClient;
