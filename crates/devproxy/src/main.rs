//! devproxy: development-time reverse proxy that forwards path-prefixed
//! requests to a local backend and hands everything else to the front-end
//! dev server.

mod config;
mod error;
mod proxy;
mod rules;
mod server;

use config::ProxyConfig;
use proxy::ProxyRouter;
use rules::ProxyRuleSet;
use server::AppState;

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1).cloned())
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("DEVPROXY_CONFIG").ok())
        .unwrap_or_else(|| "devproxy.toml".to_string());

    let listen_override = args
        .iter()
        .position(|a| a == "--listen")
        .and_then(|i| args.get(i + 1).cloned());

    let check_only = args.iter().any(|a| a == "--check");

    // Load configuration
    let mut config = ProxyConfig::load(&config_path)?;

    // CLI overrides take precedence over TOML and env vars
    if let Some(addr) = listen_override {
        config.server.listen_address = addr;
    }

    // Build the tokio runtime first: the tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = devproxy_tracing::init_tracing(&config.tracing);
        tracing::debug!(otlp_export = tracing_guard.exporting(), "Tracing initialized");
        start(config, &config_path, check_only).await
    })
}

/// Validate the rule set, then either print it (`--check`) or serve.
async fn start(config: ProxyConfig, config_path: &str, check_only: bool) -> anyhow::Result<()> {
    // An invalid rule set is fatal: nothing is bound until it validates.
    let rules = ProxyRuleSet::from_config(&config.proxy)?;
    let fallthrough = server::fallthrough_rule(config.fallthrough.url.as_deref())?;

    if check_only {
        print_rules(&rules, fallthrough.as_ref());
        return Ok(());
    }

    if rules.is_empty() {
        tracing::warn!(config_path = %config_path, "No proxy rules configured, every request falls through");
    }

    tracing::info!(
        config_path = %config_path,
        listen_address = %config.server.listen_address,
        rules = rules.len(),
        fallthrough = ?config.fallthrough.url,
        "Starting devproxy"
    );
    for rule in rules.iter() {
        tracing::info!(
            prefix = %rule.path_prefix(),
            target = %rule.target_origin(),
            change_origin = rule.rewrite_host_header(),
            "Proxy rule"
        );
    }

    run(config, rules, fallthrough).await
}

async fn run(
    config: ProxyConfig,
    rules: ProxyRuleSet,
    fallthrough: Option<rules::ProxyRule>,
) -> anyhow::Result<()> {
    let router = ProxyRouter::new(rules, &config.upstream)?;

    let state = AppState {
        router,
        fallthrough,
    };

    server::run(state, &config.server.listen_address).await
}

/// `--check` output: one line per rule in match order.
fn print_rules(rules: &ProxyRuleSet, fallthrough: Option<&rules::ProxyRule>) {
    println!("{} proxy rule(s), first match wins:", rules.len());
    for rule in rules.iter() {
        let summary = rule.summary();
        println!(
            "  {:<24} -> {}{}{}",
            summary.prefix,
            summary.target,
            if summary.change_origin { " [change_origin]" } else { "" },
            if summary.strip_prefix { " [strip_prefix]" } else { "" },
        );
    }
    match fallthrough {
        Some(rule) => println!("unmatched requests -> {}", rule.target_origin()),
        None => println!("unmatched requests -> 404"),
    }
}
