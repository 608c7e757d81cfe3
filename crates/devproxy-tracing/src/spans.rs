//! Span builder helpers for devproxy instrumentation.

/// Create a tracing span for one inbound request handled by the proxy.
///
/// Usage: `proxy_request_span!(correlation_id, method, path)`
///
/// `rule` is recorded once the request is matched (or left empty when it
/// falls through).
#[macro_export]
macro_rules! proxy_request_span {
    ($correlation_id:expr, $method:expr, $path:expr) => {
        tracing::info_span!(
            "proxy_request",
            correlation_id = %$correlation_id,
            method = %$method,
            path = %$path,
            rule = tracing::field::Empty,
        )
    };
}

/// Create a tracing span for the forward to an upstream origin.
///
/// Timing fields recorded later by the relay body:
/// - `ttfb_ms`: milliseconds from request send to first body chunk
/// - `total_duration_ms`: milliseconds from request send to stream end
/// - `chunks` / `bytes`: how much was relayed to the client
#[macro_export]
macro_rules! upstream_forward_span {
    ($correlation_id:expr, $target:expr) => {
        tracing::info_span!(
            "upstream_forward",
            correlation_id = %$correlation_id,
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            ttfb_ms = tracing::field::Empty,
            total_duration_ms = tracing::field::Empty,
            chunks = tracing::field::Empty,
            bytes = tracing::field::Empty,
        )
    };
}
