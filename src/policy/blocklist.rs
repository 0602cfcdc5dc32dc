//! SSRF blocklist.
//!
//! Rules are loaded once from environment-style variables named
//! `CAMUNDA_CONNECTOR_HTTP_BLOCK_<TYPE>_<NAME>` and evaluated in registration
//! order before any connection is opened. A malformed entry is logged and
//! skipped; it never prevents the remaining rules from loading.

use regex::Regex;
use std::env;
use url::{Host, Url};

use crate::error::{HttpClientError, Result};

pub const BLOCKLIST_PREFIX: &str = "CAMUNDA_CONNECTOR_HTTP_BLOCK_";

/// What a rule compares against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    Host,
    Port,
    Regex,
}

impl RuleKind {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "URL" | "HOST" => Some(RuleKind::Host),
            "PORT" => Some(RuleKind::Port),
            "REGEX" => Some(RuleKind::Regex),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Host(String),
    Port(u16),
    Regex(Regex),
}

/// A single deny rule. Immutable once built.
#[derive(Debug, Clone)]
pub struct BlockRule {
    name: String,
    value: String,
    matcher: Matcher,
}

impl BlockRule {
    /// Builds a rule, rejecting values that cannot be interpreted for `kind`.
    pub fn new(kind: RuleKind, name: impl Into<String>, value: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        let trimmed = value.trim();

        if name.is_empty() {
            return Err(HttpClientError::Configuration(
                "blocklist rule name must not be empty".to_string(),
            ));
        }
        if trimmed.is_empty() {
            return Err(HttpClientError::Configuration(format!(
                "blocklist rule '{}' has an empty value",
                name
            )));
        }

        let matcher = match kind {
            RuleKind::Host => Matcher::Host(normalize_host(trimmed).ok_or_else(|| {
                HttpClientError::Configuration(format!(
                    "blocklist rule '{}' has an invalid host '{}'",
                    name, trimmed
                ))
            })?),
            RuleKind::Port => Matcher::Port(trimmed.parse().map_err(|_| {
                HttpClientError::Configuration(format!(
                    "blocklist rule '{}' has an invalid port '{}'",
                    name, trimmed
                ))
            })?),
            RuleKind::Regex => Matcher::Regex(Regex::new(trimmed).map_err(|e| {
                HttpClientError::Configuration(format!(
                    "blocklist rule '{}' has an invalid pattern: {}",
                    name, e
                ))
            })?),
        };

        Ok(Self {
            name,
            value: trimmed.to_string(),
            matcher,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn kind(&self) -> RuleKind {
        match self.matcher {
            Matcher::Host(_) => RuleKind::Host,
            Matcher::Port(_) => RuleKind::Port,
            Matcher::Regex(_) => RuleKind::Regex,
        }
    }

    pub fn matches(&self, url: &Url) -> bool {
        match &self.matcher {
            Matcher::Host(blocked) => url
                .host()
                .map(|host| host_key(&host).eq_ignore_ascii_case(blocked))
                .unwrap_or(false),
            Matcher::Port(blocked) => url.port_or_known_default() == Some(*blocked),
            Matcher::Regex(pattern) => pattern.is_match(url.as_str()),
        }
    }
}

/// Ordered set of deny rules; the first match wins.
#[derive(Debug, Clone, Default)]
pub struct Blocklist {
    rules: Vec<BlockRule>,
}

impl Blocklist {
    pub fn new(rules: Vec<BlockRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads rules from the process environment, sorted by variable name.
    pub fn from_env() -> Self {
        let mut vars: Vec<(String, String)> = env::vars()
            .filter(|(key, _)| key.starts_with(BLOCKLIST_PREFIX))
            .collect();
        vars.sort();
        Self::from_vars(vars)
    }

    /// Loads rules from `vars` in iteration order. Unrelated variables are ignored.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut rules = Vec::new();
        for (key, value) in vars {
            let key = key.into();
            let Some(entry) = key.strip_prefix(BLOCKLIST_PREFIX) else {
                continue;
            };

            let Some((kind, name)) = entry.split_once('_') else {
                tracing::warn!(variable = %key, "Ignoring blocklist entry without a rule name");
                continue;
            };

            let Some(kind) = RuleKind::parse(kind) else {
                tracing::warn!(variable = %key, kind = %kind, "Ignoring blocklist entry with unknown type");
                continue;
            };

            match BlockRule::new(kind, name, value) {
                Ok(rule) => {
                    tracing::debug!(name = %rule.name(), kind = ?rule.kind(), "Registered blocklist rule");
                    rules.push(rule);
                }
                Err(e) => tracing::warn!(variable = %key, error = %e, "Ignoring malformed blocklist entry"),
            }
        }

        tracing::info!(rules = rules.len(), "Blocklist loaded");
        Self { rules }
    }

    pub fn rules(&self) -> &[BlockRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Fails with an input-validation error naming the first matching rule.
    pub fn validate_url(&self, url: &Url) -> Result<()> {
        match self.rules.iter().find(|rule| rule.matches(url)) {
            Some(rule) => {
                tracing::warn!(url = %url, rule = %rule.name(), "Blocked outbound request");
                Err(HttpClientError::Blocked {
                    rule: rule.name().to_string(),
                })
            }
            None => Ok(()),
        }
    }

    /// Parses `url` and validates it.
    pub fn validate_str(&self, url: &str) -> Result<Url> {
        let parsed = Url::parse(url)
            .map_err(|e| HttpClientError::InvalidInput(format!("Invalid URL '{}': {}", url, e)))?;
        self.validate_url(&parsed)?;
        Ok(parsed)
    }
}

/// Accepts either a bare host or a full URL and returns the comparable host.
fn normalize_host(value: &str) -> Option<String> {
    if value.contains("://") {
        let url = Url::parse(value).ok()?;
        return url.host().map(|host| host_key(&host));
    }

    let candidate = if value.contains(':') && !value.starts_with('[') {
        format!("[{}]", value)
    } else {
        value.to_string()
    };
    Host::parse(&candidate).ok().map(|host| host_key(&host))
}

fn host_key<S: AsRef<str>>(host: &Host<S>) -> String {
    match host {
        Host::Domain(domain) => domain.as_ref().trim_end_matches('.').to_ascii_lowercase(),
        Host::Ipv4(ip) => ip.to_string(),
        Host::Ipv6(ip) => ip.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(value: &str) -> Url {
        Url::parse(value).unwrap()
    }

    #[test]
    fn test_host_rule_from_url_value() {
        let list = Blocklist::from_vars([(
            "CAMUNDA_CONNECTOR_HTTP_BLOCK_URL_GCP_META_DATA",
            "http://metadata.google.internal",
        )]);
        let err = list
            .validate_url(&url("http://Metadata.Google.Internal/computeMetadata/v1/"))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The provided URL is not allowed (Block Name: GCP_META_DATA)"
        );
        assert!(list.validate_url(&url("http://example.com/")).is_ok());
    }

    #[test]
    fn test_host_rule_with_ip_and_ipv6() {
        let list = Blocklist::from_vars([
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_HOST_LINK_LOCAL", "169.254.169.254"),
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_HOST_LOOPBACK_V6", "[::1]"),
        ]);
        assert!(list.validate_url(&url("http://169.254.169.254/latest")).is_err());
        assert!(list.validate_url(&url("http://[::1]:8080/")).is_err());
        assert!(list.validate_url(&url("http://169.254.169.253/")).is_ok());
    }

    #[test]
    fn test_port_rule_uses_default_port() {
        let list = Blocklist::from_vars([("CAMUNDA_CONNECTOR_HTTP_BLOCK_PORT_HTTP", "80")]);
        assert!(list.validate_url(&url("http://example.com/")).is_err());
        assert!(list.validate_url(&url("http://example.com:80/")).is_err());
        assert!(list.validate_url(&url("https://example.com/")).is_ok());
    }

    #[test]
    fn test_regex_rule_matches_full_url() {
        let list = Blocklist::from_vars([(
            "CAMUNDA_CONNECTOR_HTTP_BLOCK_REGEX_INTERNAL",
            r"^https?://[^/]*\.internal(:\d+)?/",
        )]);
        assert!(list.validate_url(&url("https://db.internal/")).is_err());
        assert!(list.validate_url(&url("https://db.internal:5432/x")).is_err());
        assert!(list.validate_url(&url("https://internal.example.com/")).is_ok());
    }

    #[test]
    fn test_first_match_in_registration_order_wins() {
        let list = Blocklist::from_vars([
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_PORT_SECOND", "443"),
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_HOST_FIRST", "example.com"),
        ]);
        let err = list.validate_url(&url("https://example.com/")).unwrap_err();
        assert!(err.to_string().contains("SECOND"));
    }

    #[test]
    fn test_malformed_entries_are_skipped() {
        let list = Blocklist::from_vars([
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_PORT_BAD", "not-a-port"),
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_REGEX_BROKEN", "(unclosed"),
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_UNKNOWN_THING", "value"),
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_URL", "no-name.example"),
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_HOST_EMPTY", "  "),
            ("CAMUNDA_CONNECTOR_HTTP_BLOCK_HOST_VALID", "blocked.example"),
            ("UNRELATED_VARIABLE", "blocked.example"),
        ]);
        assert_eq!(list.rules().len(), 1);
        assert_eq!(list.rules()[0].name(), "VALID");
        assert!(list.validate_url(&url("http://blocked.example/")).is_err());
    }

    #[test]
    fn test_validate_str_rejects_invalid_url() {
        let err = Blocklist::empty().validate_str("not a url").unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidInput(_)));
    }

    #[test]
    fn test_empty_blocklist_allows_everything() {
        let list = Blocklist::empty();
        assert!(list.is_empty());
        assert!(list.validate_str("http://localhost:8080/admin").is_ok());
    }
}
