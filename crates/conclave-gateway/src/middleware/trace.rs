use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;

use conclave_core::trace::{TraceId, TRACE_HEADER};

/// Read `X-Trace-Id` (or generate a fresh id), install it as the
/// task-local trace for the whole request, and echo it on the response.
/// Every log line emitted inside the request span carries the id.
pub async fn inject(mut req: Request, next: Next) -> Response {
    let trace_id = req
        .headers()
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_header)
        .unwrap_or_else(TraceId::generate);

    req.extensions_mut().insert(trace_id.clone());
    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %req.method(),
        path = %req.uri().path(),
    );

    let mut response = trace_id.clone().scope(next.run(req)).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_HEADER, value);
    }
    response
}
