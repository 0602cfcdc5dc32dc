//! Outbound request policy: SSRF blocklist and forward-proxy routing.
//!
//! Both are evaluated before a connection is opened, in that order.

pub mod blocklist;
pub mod proxy;

pub use blocklist::{BlockRule, Blocklist, RuleKind};
pub use proxy::{
    NonProxyHostPattern, NonProxyHosts, ProxyDecision, ProxyEndpoint, ProxyRoutePlanner,
    ProxySelector,
};
