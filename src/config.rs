use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::{HttpClientError, Result};

pub const MAX_BODY_SIZE_VAR: &str = "CONNECTOR_HTTP_CLIENT_MAX_BODY_SIZE";
pub const MAX_CONNECTIONS_VAR: &str = "CONNECTOR_HTTP_CLIENT_MAX_CONNECTIONS";
pub const MAX_CONNECTIONS_PER_ROUTE_VAR: &str = "CONNECTOR_HTTP_CLIENT_MAX_CONNECTIONS_PER_ROUTE";
pub const CONNECT_TIMEOUT_VAR: &str = "CONNECTOR_HTTP_CLIENT_CONNECT_TIMEOUT_SECONDS";
pub const READ_TIMEOUT_VAR: &str = "CONNECTOR_HTTP_CLIENT_READ_TIMEOUT_SECONDS";

/// 50 MiB.
pub const DEFAULT_MAX_BODY_SIZE: usize = 50 * 1024 * 1024;
pub const DEFAULT_MAX_CONNECTIONS: usize = 200;
pub const DEFAULT_MAX_CONNECTIONS_PER_ROUTE: usize = 20;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 20;
pub const DEFAULT_PORT: u16 = 8080;

/// Settings of the outbound HTTP core.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpClientConfig {
    /// Largest response body held in memory.
    pub max_body_size: usize,
    /// Ceiling on concurrently open connections across all routes.
    pub max_connections: usize,
    /// Ceiling on concurrently open connections per scheme/host/port.
    pub max_connections_per_route: usize,
    /// `None` disables the timeout.
    pub connect_timeout: Option<Duration>,
    /// `None` disables the timeout.
    pub read_timeout: Option<Duration>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_connections_per_route: DEFAULT_MAX_CONNECTIONS_PER_ROUTE,
            connect_timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
            read_timeout: Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
        }
    }
}

impl HttpClientConfig {
    /// Loads the settings from the process environment, failing on invalid values.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        Ok(Self {
            max_body_size: positive(&vars, MAX_BODY_SIZE_VAR, DEFAULT_MAX_BODY_SIZE)?,
            max_connections: positive(&vars, MAX_CONNECTIONS_VAR, DEFAULT_MAX_CONNECTIONS)?,
            max_connections_per_route: positive(
                &vars,
                MAX_CONNECTIONS_PER_ROUTE_VAR,
                DEFAULT_MAX_CONNECTIONS_PER_ROUTE,
            )?,
            connect_timeout: timeout_seconds(&vars, CONNECT_TIMEOUT_VAR)?,
            read_timeout: timeout_seconds(&vars, READ_TIMEOUT_VAR)?,
        })
    }
}

/// Configuration of the remote execution binary.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub http: HttpClientConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = match env::var("PORT") {
            Ok(value) => value.trim().parse().map_err(|_| {
                HttpClientError::Configuration(format!("PORT must be a valid port, got '{}'", value))
            })?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            port,
            http: HttpClientConfig::from_env()?,
        })
    }
}

fn positive(vars: &HashMap<String, String>, name: &str, default: usize) -> Result<usize> {
    let Some(raw) = vars.get(name) else {
        return Ok(default);
    };

    match raw.trim().parse::<i64>() {
        Ok(value) if value > 0 => usize::try_from(value).map_err(|_| invalid(name, raw)),
        _ => Err(invalid(name, raw)),
    }
}

fn timeout_seconds(vars: &HashMap<String, String>, name: &str) -> Result<Option<Duration>> {
    let Some(raw) = vars.get(name) else {
        return Ok(Some(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)));
    };

    match raw.trim().parse::<u64>() {
        Ok(0) => Ok(None),
        Ok(seconds) => Ok(Some(Duration::from_secs(seconds))),
        Err(_) => Err(HttpClientError::Configuration(format!(
            "{} must be a non-negative number of seconds, got '{}'",
            name, raw
        ))),
    }
}

fn invalid(name: &str, raw: &str) -> HttpClientError {
    HttpClientError::Configuration(format!("{} must be a positive integer, got '{}'", name, raw))
}
