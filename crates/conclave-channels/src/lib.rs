//! Channel adapters: the common interface every chat surface implements,
//! a bounded rolling history, and the in-process channel used by the
//! gateway webchat path and by tests.

pub mod adapter;
pub mod error;
pub mod history;
pub mod local;
pub mod types;

pub use adapter::ChannelAdapter;
pub use error::ChannelError;
pub use local::LocalChannel;
pub use types::{InboundEvent, OutboundMessage};
