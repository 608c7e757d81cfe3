//! Error types: fatal configuration errors and per-request proxy errors.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// A malformed proxy rule or fallthrough target. Aborts startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("proxy rule for target '{target}' has an empty path prefix")]
    EmptyPrefix { target: String },

    #[error("proxy rule '{prefix}': path prefix must begin with '/'")]
    PrefixMissingSlash { prefix: String },

    #[error("proxy rule '{prefix}' is declared more than once")]
    DuplicatePrefix { prefix: String },

    #[error("proxy rule '{prefix}': invalid target '{target}': {source}")]
    InvalidTarget {
        prefix: String,
        target: String,
        #[source]
        source: url::ParseError,
    },

    #[error("proxy rule '{prefix}': target '{target}' must use http or https")]
    UnsupportedScheme { prefix: String, target: String },

    #[error("proxy rule '{prefix}': target '{target}' has no host")]
    TargetMissingHost { prefix: String, target: String },

    #[error("proxy rule '{prefix}': target '{target}' must not carry a query or fragment")]
    TargetHasQuery { prefix: String, target: String },

    #[error("proxy rule '{prefix}': invalid header '{name}': {reason}")]
    InvalidHeader {
        prefix: String,
        name: String,
        reason: String,
    },

    #[error("invalid fallthrough url: {0}")]
    InvalidFallthrough(#[source] Box<ConfigError>),
}

/// Failure while handling a single request. Isolated to that request.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream {target} unavailable: {source}")]
    UpstreamUnavailable {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("upstream {target} did not respond within {timeout:?}")]
    UpstreamTimeout { target: String, timeout: Duration },

    #[error("failed to build upstream request for {target}: {source}")]
    RequestBuild {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("path {path} leaves the upstream base path")]
    InvalidPath { path: String },

    #[error("no proxy rule matches {path}")]
    NoRoute { path: String },
}

impl ProxyError {
    /// Classify a `reqwest` send failure. Client-side timeouts (connect) map to
    /// `UpstreamTimeout`, builder errors to `RequestBuild`, everything else to
    /// `UpstreamUnavailable`.
    pub fn from_send(target: &str, error: reqwest::Error, timeout: Duration) -> Self {
        if error.is_timeout() {
            ProxyError::UpstreamTimeout {
                target: target.to_string(),
                timeout,
            }
        } else if error.is_builder() {
            ProxyError::RequestBuild {
                target: target.to_string(),
                source: error,
            }
        } else {
            ProxyError::UpstreamUnavailable {
                target: target.to_string(),
                source: error,
            }
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::RequestBuild { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::InvalidPath { .. } => StatusCode::BAD_REQUEST,
            ProxyError::NoRoute { .. } => StatusCode::NOT_FOUND,
        }
    }

    fn target(&self) -> Option<&str> {
        match self {
            ProxyError::UpstreamUnavailable { target, .. }
            | ProxyError::UpstreamTimeout { target, .. }
            | ProxyError::RequestBuild { target, .. } => Some(target),
            ProxyError::InvalidPath { .. } | ProxyError::NoRoute { .. } => None,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let body = match self.target() {
            Some(target) => serde_json::json!({ "error": self.to_string(), "target": target }),
            None => serde_json::json!({ "error": self.to_string() }),
        };
        (self.status(), axum::Json(body)).into_response()
    }
}
