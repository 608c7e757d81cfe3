//! `ProxyRouter`: the immutable rule set plus the client used to reach upstreams.

use std::sync::Arc;

use axum::extract::Request;
use axum::response::{IntoResponse, Response};

use super::forward::{self, Timeouts};
use crate::config::UpstreamConfig;
use crate::rules::{ProxyRule, ProxyRuleSet};

/// Decides match/no-match for a path and forwards matched requests.
///
/// Holds no per-request state. Clones share the rule set and the client's
/// connection pool, so handlers can run concurrently without locking.
#[derive(Clone)]
pub struct ProxyRouter {
    rules: Arc<ProxyRuleSet>,
    client: reqwest::Client,
    timeouts: Timeouts,
}

impl ProxyRouter {
    /// Build a router with its own upstream client.
    ///
    /// Redirects are relayed to the client instead of followed, and system
    /// proxy settings are ignored since upstreams are local.
    pub fn new(rules: ProxyRuleSet, upstream: &UpstreamConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(upstream.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()?;

        Ok(Self::with_client(
            rules,
            client,
            Timeouts {
                connect: upstream.connect_timeout(),
                response: upstream.response_timeout(),
            },
        ))
    }

    pub fn with_client(rules: ProxyRuleSet, client: reqwest::Client, timeouts: Timeouts) -> Self {
        Self {
            rules: Arc::new(rules),
            client,
            timeouts,
        }
    }

    pub fn rules(&self) -> &ProxyRuleSet {
        &self.rules
    }

    /// First rule, in declaration order, whose prefix is a prefix of `path`.
    pub fn match_path(&self, path: &str) -> Option<&ProxyRule> {
        self.rules.match_path(path)
    }

    /// Forward `request` per `rule`. Upstream failures become gateway error
    /// responses; they never escape as errors.
    pub async fn forward(&self, request: Request, rule: &ProxyRule, correlation_id: &str) -> Response {
        forward::forward(&self.client, rule, request, correlation_id, self.timeouts)
            .await
            .unwrap_or_else(IntoResponse::into_response)
    }
}
