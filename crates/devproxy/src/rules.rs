//! Path-prefix proxy rules and the ordered, immutable rule set.
//!
//! A rule set is built once at startup and only read afterwards. Lookup is a
//! linear first-match scan in declaration order: rule sets for a dev server
//! hold a handful of entries, and declaration order is the tie-breaker for
//! overlapping prefixes.

use http::{HeaderName, HeaderValue};
use serde::Serialize;
use url::Url;

use crate::config::ProxyRuleConfig;
use crate::error::ConfigError;

/// A single `prefix -> upstream` forwarding rule.
#[derive(Debug, Clone)]
pub struct ProxyRule {
    path_prefix: String,
    target_origin: Url,
    rewrite_host_header: bool,
    strip_prefix: bool,
    headers: Vec<(HeaderName, HeaderValue)>,
}

/// JSON view of a rule, served by the status endpoint and printed by `--check`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RuleSummary {
    pub prefix: String,
    pub target: String,
    pub change_origin: bool,
    pub strip_prefix: bool,
}

impl ProxyRule {
    /// Validate and build a rule.
    ///
    /// The prefix must be non-empty and start with `/`. The target must be an
    /// absolute `http`/`https` URL with a host and without query or fragment;
    /// a path on the target becomes a base path for forwarded requests.
    pub fn new(
        prefix: impl Into<String>,
        target: &str,
        rewrite_host_header: bool,
    ) -> Result<Self, ConfigError> {
        let path_prefix = prefix.into();
        if path_prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix {
                target: target.to_string(),
            });
        }
        if !path_prefix.starts_with('/') {
            return Err(ConfigError::PrefixMissingSlash {
                prefix: path_prefix,
            });
        }

        let target_origin = Url::parse(target).map_err(|source| ConfigError::InvalidTarget {
            prefix: path_prefix.clone(),
            target: target.to_string(),
            source,
        })?;
        if !matches!(target_origin.scheme(), "http" | "https") {
            return Err(ConfigError::UnsupportedScheme {
                prefix: path_prefix,
                target: target.to_string(),
            });
        }
        if target_origin.host_str().is_none() {
            return Err(ConfigError::TargetMissingHost {
                prefix: path_prefix,
                target: target.to_string(),
            });
        }
        if target_origin.query().is_some() || target_origin.fragment().is_some() {
            return Err(ConfigError::TargetHasQuery {
                prefix: path_prefix,
                target: target.to_string(),
            });
        }

        Ok(Self {
            path_prefix,
            target_origin,
            rewrite_host_header,
            strip_prefix: false,
            headers: Vec::new(),
        })
    }

    /// Build a rule from its configuration entry.
    pub fn from_config(config: &ProxyRuleConfig) -> Result<Self, ConfigError> {
        let mut rule = Self::new(config.prefix.clone(), &config.target, config.change_origin)?
            .with_strip_prefix(config.strip_prefix);
        for header in &config.headers {
            rule = rule.with_header(&header.name, &header.value)?;
        }
        Ok(rule)
    }

    pub fn with_strip_prefix(mut self, strip_prefix: bool) -> Self {
        self.strip_prefix = strip_prefix;
        self
    }

    /// Add an extra header sent with every forwarded request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidHeader {
            prefix: self.path_prefix.clone(),
            name: name.to_string(),
            reason,
        };
        let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        self.headers.push((header_name, header_value));
        Ok(self)
    }

    pub fn path_prefix(&self) -> &str {
        &self.path_prefix
    }

    pub fn target_origin(&self) -> &Url {
        &self.target_origin
    }

    pub fn rewrite_host_header(&self) -> bool {
        self.rewrite_host_header
    }

    pub fn headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Literal prefix comparison; no wildcard or segment semantics.
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(&self.path_prefix)
    }

    /// `host[:port]` of the target, port omitted when it is the scheme default.
    pub fn authority(&self) -> String {
        let host = self.target_origin.host_str().unwrap_or_default();
        match self.target_origin.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        }
    }

    /// `scheme://host[:port]` of the target, as sent in an `Origin` header.
    pub fn origin(&self) -> String {
        self.target_origin.origin().ascii_serialization()
    }

    /// Upstream URL for an inbound `path` and optional raw `query`.
    ///
    /// The path is normalized the same way [`ProxyRuleSet::match_path`] sees
    /// it, the matched prefix is removed when the rule strips it, and the
    /// target's base path is prepended. Returns `None` when the forwarded
    /// part would still contain a `.` or `..` segment, which could otherwise
    /// climb out of the base path.
    pub fn upstream_url(&self, path: &str, query: Option<&str>) -> Option<Url> {
        let path = normalize_path(path);
        let forwarded = if self.strip_prefix {
            let rest = path.strip_prefix(self.path_prefix.as_str()).unwrap_or(&path);
            if rest.starts_with('/') {
                rest.to_string()
            } else {
                format!("/{rest}")
            }
        } else {
            path
        };
        if forwarded.split(['/', '\\']).any(is_dot_segment) {
            return None;
        }

        let base = self.target_origin.path().trim_end_matches('/');
        let mut url = self.target_origin.clone();
        url.set_path(&format!("{base}{forwarded}"));
        url.set_query(query);
        Some(url)
    }

    pub fn summary(&self) -> RuleSummary {
        RuleSummary {
            prefix: self.path_prefix.clone(),
            target: self.target_origin.to_string(),
            change_origin: self.rewrite_host_header,
            strip_prefix: self.strip_prefix,
        }
    }
}

/// Resolve `.` and `..` segments the way the upstream URL will, so a path
/// is matched in the same form it is forwarded in. `/api/../admin` becomes
/// `/admin`.
pub fn normalize_path(path: &str) -> String {
    match Url::parse("http://localhost/") {
        Ok(mut url) => {
            url.set_path(path);
            url.path().to_string()
        }
        Err(_) => path.to_string(),
    }
}

/// `.` or `..`, including their percent-encoded spellings.
fn is_dot_segment(segment: &str) -> bool {
    let decoded = segment.to_ascii_lowercase().replace("%2e", ".");
    decoded == "." || decoded == ".."
}

/// Ordered rules; the first rule whose prefix matches a path wins.
#[derive(Debug, Clone, Default)]
pub struct ProxyRuleSet {
    rules: Vec<ProxyRule>,
}

impl ProxyRuleSet {
    /// Build a rule set, rejecting duplicate prefixes.
    ///
    /// A rule that sits behind an earlier, shorter prefix can never match and
    /// is reported with a warning.
    pub fn new(rules: Vec<ProxyRule>) -> Result<Self, ConfigError> {
        for (i, rule) in rules.iter().enumerate() {
            for earlier in &rules[..i] {
                if earlier.path_prefix == rule.path_prefix {
                    return Err(ConfigError::DuplicatePrefix {
                        prefix: rule.path_prefix.clone(),
                    });
                }
                if rule.path_prefix.starts_with(&earlier.path_prefix) {
                    tracing::warn!(
                        prefix = %rule.path_prefix,
                        shadowed_by = %earlier.path_prefix,
                        "Proxy rule is unreachable: an earlier rule matches first"
                    );
                }
            }
        }
        Ok(Self { rules })
    }

    pub fn from_config(configs: &[ProxyRuleConfig]) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .map(ProxyRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(rules)
    }

    /// First rule, in declaration order, whose prefix is a prefix of the
    /// normalized `path`.
    pub fn match_path(&self, path: &str) -> Option<&ProxyRule> {
        let path = normalize_path(path);
        self.rules.iter().find(|rule| rule.matches(&path))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProxyRule> {
        self.rules.iter()
    }
}
