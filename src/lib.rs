pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod infra;
pub mod policy;
pub mod routes;
pub mod shared;

pub use auth::{Authentication, AuthenticationConfig, TokenCache};
pub use client::{HttpClientRequest, HttpClientResult, HttpExecutor, MappedResult, ResultShape};
pub use config::{Config, HttpClientConfig};
pub use error::{HttpClientError, Result};
pub use policy::{Blocklist, ProxySelector};
