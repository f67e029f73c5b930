use std::net::Ipv4Addr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::Protocol;
use crate::{DEFAULT_CLIENT_NAME, DEFAULT_SERVER_PORT, DISCOVERY_PORT};

/// Command-channel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Label announced in the `CONNECT` handshake.
    #[serde(alias = "clientName")]
    pub client_name: String,
    pub protocol: Protocol,
    /// Port used when the user enters only a host.
    #[serde(alias = "defaultPort")]
    pub default_port: u16,
    #[serde(alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            protocol: Protocol::Tcp,
            default_port: DEFAULT_SERVER_PORT,
            connect_timeout_ms: 5_000,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `PONIO_CLIENT_NAME`, `PONIO_PROTOCOL`,
    /// `PONIO_PORT` and `PONIO_CONNECT_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(name) = lookup("PONIO_CLIENT_NAME").filter(|s| !s.trim().is_empty()) {
            cfg.client_name = name;
        }
        if let Some(protocol) = parsed(&lookup, "PONIO_PROTOCOL") {
            cfg.protocol = protocol;
        }
        if let Some(port) = parsed(&lookup, "PONIO_PORT") {
            cfg.default_port = port;
        }
        if let Some(ms) = parsed(&lookup, "PONIO_CONNECT_TIMEOUT_MS") {
            cfg.connect_timeout_ms = ms;
        }
        cfg
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Discovery scan settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    #[serde(alias = "discoveryPort")]
    pub discovery_port: u16,
    /// Total budget of one scan, from probe to completion.
    #[serde(alias = "scanTimeoutMs")]
    pub scan_timeout_ms: u64,
    /// Upper bound of a single receive wait; the stop flag is checked
    /// between waits.
    #[serde(alias = "recvPollMs")]
    pub recv_poll_ms: u64,
    /// Explicit probe destinations. Empty means "every local subnet
    /// broadcast plus 255.255.255.255".
    pub targets: Vec<Ipv4Addr>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            discovery_port: DISCOVERY_PORT,
            scan_timeout_ms: 3_000,
            recv_poll_ms: 250,
            targets: Vec::new(),
        }
    }
}

impl DiscoveryConfig {
    /// Defaults overridden by `PONIO_DISCOVERY_PORT` and
    /// `PONIO_SCAN_TIMEOUT_MS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut cfg = Self::default();
        if let Some(port) = parsed(&lookup, "PONIO_DISCOVERY_PORT") {
            cfg.discovery_port = port;
        }
        if let Some(ms) = parsed(&lookup, "PONIO_SCAN_TIMEOUT_MS") {
            cfg.scan_timeout_ms = ms;
        }
        cfg
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    pub fn recv_poll_interval(&self) -> Duration {
        Duration::from_millis(self.recv_poll_ms.max(1))
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid value", key, raw);
            None
        }
    }
}
