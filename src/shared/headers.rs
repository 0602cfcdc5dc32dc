//! Header flattening utilities.
//!
//! Converts an `http::HeaderMap` (ordered, case-insensitive multi-map) into the
//! caller-facing shape: a single-valued header becomes a string, a repeated
//! header becomes an ordered list of strings.

use http::HeaderMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

/// Value of a flattened header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderEntry {
    Single(String),
    Multiple(Vec<String>),
}

impl HeaderEntry {
    /// First value of the header.
    pub fn first(&self) -> &str {
        match self {
            HeaderEntry::Single(value) => value,
            HeaderEntry::Multiple(values) => values.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// All values, in the order they were received.
    pub fn values(&self) -> Vec<&str> {
        match self {
            HeaderEntry::Single(value) => vec![value.as_str()],
            HeaderEntry::Multiple(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

impl Serialize for HeaderEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            HeaderEntry::Single(value) => serializer.serialize_str(value),
            HeaderEntry::Multiple(values) => values.serialize(serializer),
        }
    }
}

/// Response headers keyed by name, in first-seen order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenedHeaders {
    entries: Vec<(String, HeaderEntry)>,
}

impl FlattenedHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let entries = headers
            .keys()
            .map(|name| {
                let mut values: Vec<String> = headers
                    .get_all(name)
                    .iter()
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .collect();
                let entry = if values.len() == 1 {
                    HeaderEntry::Single(values.remove(0))
                } else {
                    HeaderEntry::Multiple(values)
                };
                (name.as_str().to_string(), entry)
            })
            .collect();
        Self { entries }
    }

    /// Case-insensitive lookup.
    pub fn get(&self, name: &str) -> Option<&HeaderEntry> {
        self.entries
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, entry)| entry)
    }

    /// Case-insensitive lookup returning only the first value.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).map(HeaderEntry::first)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for FlattenedHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, entry) in &self.entries {
            map.serialize_entry(name, entry)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderValue, CONTENT_TYPE, SET_COOKIE};

    fn sample() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.append(SET_COOKIE, HeaderValue::from_static("key=value"));
        headers.append(SET_COOKIE, HeaderValue::from_static("key2=value2"));
        headers
    }

    #[test]
    fn test_single_and_multiple_values() {
        let flat = FlattenedHeaders::from_header_map(&sample());
        assert_eq!(
            flat.get("content-type"),
            Some(&HeaderEntry::Single("application/json".to_string()))
        );
        assert_eq!(
            flat.get("set-cookie"),
            Some(&HeaderEntry::Multiple(vec![
                "key=value".to_string(),
                "key2=value2".to_string()
            ]))
        );
    }

    #[test]
    fn test_lookup_is_case_insensitive_and_scalar_returns_first() {
        let flat = FlattenedHeaders::from_header_map(&sample());
        assert_eq!(flat.first("Content-Type"), Some("application/json"));
        assert_eq!(flat.first("SET-COOKIE"), Some("key=value"));
        assert_eq!(flat.first("x-missing"), None);
    }

    #[test]
    fn test_serializes_as_string_or_list() {
        let flat = FlattenedHeaders::from_header_map(&sample());
        let json = serde_json::to_value(&flat).unwrap();
        assert_eq!(json["content-type"], "application/json");
        assert_eq!(json["set-cookie"], serde_json::json!(["key=value", "key2=value2"]));
    }

    #[test]
    fn test_empty_map() {
        let flat = FlattenedHeaders::from_header_map(&HeaderMap::new());
        assert!(flat.is_empty());
        assert_eq!(flat.len(), 0);
    }
}
