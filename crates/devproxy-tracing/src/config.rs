//! The `[tracing]` section of `devproxy.toml`.

use serde::Deserialize;

/// How devproxy logs its requests, and where it ships spans.
///
/// With no OTLP endpoint the proxy only writes log lines to stderr, which is
/// the usual setup next to a front-end dev server.
#[derive(Debug, Clone, Deserialize)]
pub struct TracingConfig {
    /// `service.name` resource attribute on exported spans.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// Collector to export request and upstream spans to, e.g.
    /// `http://localhost:4317`. Unset disables export.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,

    #[serde(default)]
    pub protocol: OtlpProtocol,

    /// `EnvFilter` directives such as `info,devproxy=debug`. An invalid
    /// filter falls back to `info`.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// One JSON object per log line, for piping into a log viewer.
    #[serde(default)]
    pub json: bool,
}

/// Wire protocol spoken to the collector.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

fn default_service_name() -> String {
    "devproxy".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: default_service_name(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::default(),
            log_level: default_log_level(),
            json: false,
        }
    }
}
