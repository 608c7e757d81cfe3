//! Configuration types and loading logic.

use std::time::Duration;

use devproxy_tracing::TracingConfig;
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Proxy rules in declaration order. First match wins, so this is a
    /// TOML array of tables (`[[proxy]]`) rather than a keyed table.
    #[serde(default)]
    pub proxy: Vec<ProxyRuleConfig>,

    #[serde(default)]
    pub fallthrough: FallthroughConfig,

    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Timeouts applied to every upstream call.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// TCP connect timeout.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Time allowed between sending the request and receiving response
    /// headers. The response body itself is never timed out, so long-lived
    /// streams stay open.
    #[serde(default = "default_response_timeout")]
    pub response_timeout_secs: u64,
}

/// One `prefix -> target` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRuleConfig {
    pub prefix: String,

    pub target: String,

    /// Rewrite `Host` (and `Origin`) to the target's own authority.
    #[serde(default, alias = "changeOrigin")]
    pub change_origin: bool,

    /// Remove the matched prefix from the forwarded path.
    #[serde(default, alias = "stripPrefix")]
    pub strip_prefix: bool,

    /// Extra request headers set on every forwarded request, applied in
    /// the order listed.
    #[serde(default)]
    pub headers: Vec<HeaderConfig>,
}

/// One `name = value` extra header on a rule.
#[derive(Debug, Clone, Deserialize)]
pub struct HeaderConfig {
    pub name: String,
    pub value: String,
}

/// Where unmatched requests go (the front-end dev server or asset host).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallthroughConfig {
    /// When unset, unmatched requests are answered with 404.
    #[serde(default)]
    pub url: Option<String>,
}

fn default_listen_address() -> String {
    "127.0.0.1:5173".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_response_timeout() -> u64 {
    300
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            response_timeout_secs: default_response_timeout(),
        }
    }
}

impl UpstreamConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs(self.response_timeout_secs)
    }
}

impl ProxyConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (DEVPROXY_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: ProxyConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("DEVPROXY_").split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = ProxyConfig::load("missing.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.server.listen_address, "127.0.0.1:5173");
            assert_eq!(config.upstream.connect_timeout(), Duration::from_secs(10));
            assert_eq!(config.upstream.response_timeout(), Duration::from_secs(300));
            assert!(config.proxy.is_empty());
            assert!(config.fallthrough.url.is_none());
            Ok(())
        });
    }

    #[test]
    fn test_rules_keep_declaration_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "devproxy.toml",
                r#"
                [[proxy]]
                prefix = "/send_input"
                target = "http://localhost:8000"
                changeOrigin = true

                [[proxy]]
                prefix = "/api"
                target = "http://localhost:8000"

                [[proxy]]
                prefix = "/assets"
                target = "http://localhost:9000/static"
                change_origin = true
                strip_prefix = true
                headers = [
                    { name = "x-dev-user", value = "alice" },
                    { name = "authorization", value = "Bearer dev" },
                ]
                "#,
            )?;

            let config = ProxyConfig::load("devproxy.toml").map_err(|e| e.to_string())?;
            let prefixes: Vec<&str> = config.proxy.iter().map(|r| r.prefix.as_str()).collect();
            assert_eq!(prefixes, vec!["/send_input", "/api", "/assets"]);

            assert!(config.proxy[0].change_origin);
            assert!(!config.proxy[1].change_origin);
            assert!(!config.proxy[1].strip_prefix);
            assert!(config.proxy[2].strip_prefix);
            let headers: Vec<(&str, &str)> = config.proxy[2]
                .headers
                .iter()
                .map(|h| (h.name.as_str(), h.value.as_str()))
                .collect();
            assert_eq!(
                headers,
                vec![("x-dev-user", "alice"), ("authorization", "Bearer dev")]
            );
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "devproxy.toml",
                r#"
                [server]
                listen_address = "127.0.0.1:3000"

                [upstream]
                response_timeout_secs = 30
                "#,
            )?;
            jail.set_env("DEVPROXY_SERVER__LISTEN_ADDRESS", "0.0.0.0:4000");
            jail.set_env("DEVPROXY_FALLTHROUGH__URL", "http://localhost:5174");

            let config = ProxyConfig::load("devproxy.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.server.listen_address, "0.0.0.0:4000");
            assert_eq!(config.upstream.response_timeout_secs, 30);
            assert_eq!(config.upstream.connect_timeout_secs, 10);
            assert_eq!(config.fallthrough.url.as_deref(), Some("http://localhost:5174"));
            Ok(())
        });
    }

    #[test]
    fn test_rule_without_target_is_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "devproxy.toml",
                r#"
                [[proxy]]
                prefix = "/api"
                "#,
            )?;

            assert!(ProxyConfig::load("devproxy.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn test_tracing_section_loaded() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "devproxy.toml",
                r#"
                [tracing]
                log_level = "info,devproxy=debug"
                otlp_endpoint = "http://localhost:4318"
                protocol = "http"
                json = true
                "#,
            )?;

            let config = ProxyConfig::load("devproxy.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.tracing.log_level, "info,devproxy=debug");
            assert_eq!(config.tracing.otlp_endpoint.as_deref(), Some("http://localhost:4318"));
            assert_eq!(config.tracing.protocol, devproxy_tracing::OtlpProtocol::Http);
            assert!(config.tracing.json);
            assert_eq!(config.tracing.service_name, "devproxy");
            Ok(())
        });
    }
}
