//! Multi-bot orchestration: per-(bot, channel) observation windows with
//! AI-decided delays, topic-change tracking, participation records, and a
//! back-pressure queue per channel.

pub mod observation;
pub mod orchestrator;
pub mod participation;
pub mod queue;
pub mod roles;

pub use orchestrator::{BotOrchestrator, ChatOutcome, OrchestratorDeps};
pub use roles::RoleConfig;
