//! Utilities shared across the policy, auth and client layers.

pub mod cert_parser;
pub mod headers;
pub mod secret;

pub use cert_parser::{parse_x509_basic, BasicCertInfo};
pub use headers::{FlattenedHeaders, HeaderEntry};
pub use secret::{redact_url, Secret};
