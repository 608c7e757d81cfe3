//! Axum HTTP server: reserved status routes, catch-all proxy handler, graceful shutdown.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use crate::error::{ConfigError, ProxyError};
use crate::proxy::correlation;
use crate::proxy::ProxyRouter;
use crate::rules::{ProxyRule, RuleSummary};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: ProxyRouter,
    /// Where unmatched requests go. `None` answers them with 404.
    pub fallthrough: Option<ProxyRule>,
}

/// Build the fallthrough target from its configured URL.
///
/// Modelled as a catch-all rule that keeps the client's `Host`, so the
/// front-end dev server sees unmatched requests unchanged.
pub fn fallthrough_rule(url: Option<&str>) -> Result<Option<ProxyRule>, ConfigError> {
    url.map(|url| {
        ProxyRule::new("/", url, false).map_err(|e| ConfigError::InvalidFallthrough(Box::new(e)))
    })
    .transpose()
}

/// Build the axum application.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/__devproxy/health", get(handle_health))
        .route("/__devproxy/rules", get(handle_rules))
        .fallback(handle_proxy)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Bind and serve until Ctrl+C.
pub async fn run(state: AppState, listen_addr: &str) -> anyhow::Result<()> {
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(address = %listen_addr, "devproxy listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("devproxy shut down gracefully");
    Ok(())
}

/// Catch-all handler: match the path, then forward or fall through.
///
/// Every request gets its own correlation ID and span; nothing is shared
/// between requests except the read-only router.
async fn handle_proxy(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let correlation_id = correlation::generate_id();
    let path = request.uri().path().to_string();
    let span = devproxy_tracing::proxy_request_span!(&correlation_id, request.method(), &path);

    async {
        if let Some(rule) = state.router.match_path(&path) {
            tracing::Span::current().record("rule", rule.path_prefix());
            return state.router.forward(request, rule, &correlation_id).await;
        }

        match &state.fallthrough {
            Some(fallthrough) => {
                tracing::debug!("No proxy rule matched, forwarding to fallthrough");
                state.router.forward(request, fallthrough, &correlation_id).await
            }
            None => {
                tracing::debug!("No proxy rule matched and no fallthrough configured");
                ProxyError::NoRoute { path: path.clone() }.into_response()
            }
        }
    }
    .instrument(span)
    .await
}

/// GET /__devproxy/rules: the configured rules in match order.
async fn handle_rules(State(state): State<Arc<AppState>>) -> Response {
    let rules: Vec<RuleSummary> = state.router.rules().iter().map(ProxyRule::summary).collect();
    let fallthrough = state
        .fallthrough
        .as_ref()
        .map(|rule| rule.target_origin().to_string());
    axum::Json(serde_json::json!({ "rules": rules, "fallthrough": fallthrough })).into_response()
}

/// Health check endpoint.
async fn handle_health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Wait for SIGINT (Ctrl+C) for graceful shutdown.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, draining connections...");
}
