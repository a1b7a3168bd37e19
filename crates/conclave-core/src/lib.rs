//! Shared infrastructure for the Conclave workspace: configuration, the
//! error taxonomy and `OperationResult` envelope, common identifier types,
//! trace-context propagation, and process metrics.

pub mod config;
pub mod error;
pub mod metrics;
pub mod trace;
pub mod types;
