//! Redacting wrapper for credentials.
//!
//! Every password, client secret, token or API key that flows through the
//! crate is held in a [`Secret`], so `Debug`/`Display` output (and therefore
//! logs and error messages) can never leak it by accident.

use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

const REDACTED: &str = "***";

/// A string whose formatted representation is always redacted.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw value. Callers must not log it.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Replaces every occurrence of this secret in `text` with the redaction marker.
    pub fn scrub(&self, text: &str) -> String {
        if self.0.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.0, REDACTED)
        }
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

/// Loggable form of `url`: user info and fragment removed, every query value
/// replaced by the redaction marker. Query names are kept.
pub fn redact_url(url: &Url) -> String {
    let mut redacted = url.clone();
    // Only fails for URLs that cannot carry credentials.
    let _ = redacted.set_password(None);
    let _ = redacted.set_username("");
    redacted.set_fragment(None);

    if url.query().is_some() {
        let names: Vec<String> = url.query_pairs().map(|(name, _)| name.into_owned()).collect();
        if names.is_empty() {
            redacted.set_query(None);
        } else {
            redacted
                .query_pairs_mut()
                .clear()
                .extend_pairs(names.iter().map(|name| (name.as_str(), REDACTED)));
        }
    }
    redacted.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formatting_is_redacted() {
        let secret = Secret::new("hunter2");
        assert_eq!(format!("{:?}", secret), "***");
        assert_eq!(secret.to_string(), "***");
        assert_eq!(secret.expose(), "hunter2");
    }

    #[test]
    fn test_scrub_removes_all_occurrences() {
        let secret = Secret::new("s3cr3t");
        let text = "invalid_client: s3cr3t does not match s3cr3t";
        assert_eq!(secret.scrub(text), "invalid_client: *** does not match ***");
    }

    #[test]
    fn test_scrub_with_empty_secret_is_noop() {
        assert_eq!(Secret::default().scrub("abc"), "abc");
    }

    #[test]
    fn test_serde_is_transparent() {
        let secret: Secret = serde_json::from_str("\"value\"").unwrap();
        assert_eq!(secret.expose(), "value");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"value\"");
    }

    #[test]
    fn test_redact_url_masks_query_values_and_credentials() {
        let url = Url::parse("https://user:pw@api.example.com/v1/items?api_key=k-12345&page=2#top").unwrap();
        let logged = redact_url(&url);
        assert_eq!(logged, "https://api.example.com/v1/items?api_key=***&page=***");
        assert!(!logged.contains("k-12345"));
        assert!(!logged.contains("pw"));
    }

    #[test]
    fn test_redact_url_without_query_is_unchanged() {
        let url = Url::parse("http://example.com:8080/path").unwrap();
        assert_eq!(redact_url(&url), "http://example.com:8080/path");
    }
}
