//! Forwarding a matched request to its upstream and relaying the response.
//!
//! Bodies are streamed in both directions: the client body is handed to the
//! upstream request as a stream, and the upstream body is relayed through
//! [`RelayBody`] chunk by chunk. Nothing is buffered.

use std::time::{Duration, Instant};

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::response::Response;
use http::header::{CONNECTION, HOST, ORIGIN};
use http::{HeaderMap, HeaderName, HeaderValue};
use tracing::Instrument;

use super::correlation::CORRELATION_HEADER;
use super::relay::RelayBody;
use crate::error::ProxyError;
use crate::rules::ProxyRule;

/// Headers that apply to a single connection and are never forwarded.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Upstream timeouts. The response body itself is not timed out.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub connect: Duration,
    pub response: Duration,
}

/// Header names listed in `Connection`, which are hop-by-hop for this message.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|token| token.trim().to_ascii_lowercase())
        .filter(|token| !token.is_empty())
        .collect()
}

fn is_hop_by_hop(name: &HeaderName, listed: &[String]) -> bool {
    let name = name.as_str();
    HOP_BY_HOP_HEADERS.contains(&name) || listed.iter().any(|token| token == name)
}

/// Headers for the upstream request.
///
/// Hop-by-hop headers are dropped. With `rewrite_host_header` the `Host`
/// becomes the upstream authority and a present `Origin` becomes the upstream
/// origin; otherwise the client's `Host` is passed through. Rule headers are
/// applied last and win.
pub fn forwarded_headers(incoming: &HeaderMap, rule: &ProxyRule, correlation_id: &str) -> HeaderMap {
    let listed = connection_tokens(incoming);
    let rewrite = rule.rewrite_host_header();

    let mut headers = HeaderMap::with_capacity(incoming.len() + 2);
    for (name, value) in incoming.iter() {
        if is_hop_by_hop(name, &listed) || *name == HOST || name.as_str() == CORRELATION_HEADER {
            continue;
        }
        if rewrite && *name == ORIGIN {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let host = if rewrite {
        HeaderValue::from_str(&rule.authority()).ok()
    } else {
        incoming.get(HOST).cloned()
    };
    if let Some(host) = host {
        headers.insert(HOST, host);
    }

    if rewrite && incoming.contains_key(ORIGIN) {
        if let Ok(origin) = HeaderValue::from_str(&rule.origin()) {
            headers.insert(ORIGIN, origin);
        }
    }

    if let Ok(id) = HeaderValue::from_str(correlation_id) {
        headers.insert(CORRELATION_HEADER, id);
    }

    for (name, value) in rule.headers() {
        headers.insert(name.clone(), value.clone());
    }

    headers
}

/// Upstream response headers minus hop-by-hop ones, tagged with the
/// correlation ID.
pub fn relayed_headers(upstream: &HeaderMap, correlation_id: &str) -> HeaderMap {
    let listed = connection_tokens(upstream);

    let mut headers = HeaderMap::with_capacity(upstream.len() + 1);
    for (name, value) in upstream.iter() {
        if is_hop_by_hop(name, &listed) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(
        CORRELATION_HEADER,
        HeaderValue::from_str(correlation_id).unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    );
    headers
}

/// Forward `request` to `rule`'s upstream and stream the response back.
///
/// Fails with `UpstreamUnavailable` (502) when the upstream cannot be reached
/// or resets before sending headers, and `UpstreamTimeout` (504) when the
/// connect or response-header timeout expires. Never retries.
pub async fn forward(
    client: &reqwest::Client,
    rule: &ProxyRule,
    request: Request,
    correlation_id: &str,
    timeouts: Timeouts,
) -> Result<Response, ProxyError> {
    let target = rule.authority();
    let span = devproxy_tracing::upstream_forward_span!(correlation_id, &target);
    let start = Instant::now();

    async {
        let result = send_and_relay(client, rule, request, correlation_id, &target, timeouts, start).await;

        let latency = start.elapsed().as_millis() as u64;
        tracing::Span::current().record("latency_ms", latency);
        match &result {
            Ok(response) => {
                tracing::Span::current().record("status", response.status().as_u16());
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency,
                    "Upstream responded"
                );
            }
            Err(e) => {
                tracing::Span::current().record("status", e.status().as_u16());
                tracing::error!(error = %e, latency_ms = latency, "Upstream request failed");
            }
        }
        result
    }
    .instrument(span)
    .await
}

async fn send_and_relay(
    client: &reqwest::Client,
    rule: &ProxyRule,
    request: Request,
    correlation_id: &str,
    target: &str,
    timeouts: Timeouts,
    start: Instant,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();
    let url = rule
        .upstream_url(parts.uri.path(), parts.uri.query())
        .ok_or_else(|| ProxyError::InvalidPath {
            path: parts.uri.path().to_string(),
        })?;
    let headers = forwarded_headers(&parts.headers, rule, correlation_id);

    tracing::debug!(method = %parts.method, url = %url, "Forwarding request");

    let mut req_builder = client.request(parts.method, url).headers(headers);
    if !body.is_end_stream() {
        req_builder = req_builder.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = match tokio::time::timeout(timeouts.response, req_builder.send()).await {
        Ok(Ok(resp)) => resp,
        Ok(Err(e)) => return Err(ProxyError::from_send(target, e, timeouts.connect)),
        Err(_) => {
            return Err(ProxyError::UpstreamTimeout {
                target: target.to_string(),
                timeout: timeouts.response,
            })
        }
    };

    let status = upstream.status();
    let headers = relayed_headers(upstream.headers(), correlation_id);
    let relay = RelayBody::new(upstream.bytes_stream(), tracing::Span::current(), start);

    let mut response = Response::new(Body::from_stream(relay));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}
