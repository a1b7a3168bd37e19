//! HTTP/WebSocket gateway: the single entry point multiplexing chat,
//! memory, and administrative operations, with a middleware pipeline for
//! tracing, CORS, auth, rate limiting, body caps, and JSON validation.

pub mod app;
pub mod envelope;
pub mod http;
pub mod middleware;
pub mod shutdown;
pub mod startup;
pub mod ws;
