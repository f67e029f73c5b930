use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// MARK: - Protocol

/// Wire protocol a server advertises and the client may select.
///
/// Only [`Protocol::Tcp`] has a shipped transport; the other variants are
/// accepted so discovery replies and user selections round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Bluetooth,
}

impl Protocol {
    /// Label used in the `CONNECT` handshake and in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Bluetooth => "Bluetooth",
        }
    }
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownProtocol(pub String);

impl std::fmt::Display for UnknownProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown protocol '{}'", self.0)
    }
}

impl std::error::Error for UnknownProtocol {}

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "bluetooth" => Ok(Self::Bluetooth),
            _ => Err(UnknownProtocol(s.to_owned())),
        }
    }
}

// MARK: - DiscoveredServer

/// A Ponio server that answered a discovery probe.
///
/// Two records describe the same server when they share `(address, port)`;
/// `name` and `protocol` are informational and do not take part in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredServer {
    pub name: String,
    pub address: String,
    pub port: u16,
    pub protocol: String,
}

impl DiscoveredServer {
    pub fn new(
        name: impl Into<String>,
        address: impl Into<String>,
        port: u16,
        protocol: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            port,
            protocol: protocol.into(),
        }
    }

    /// The advertised protocol, if it is one the client knows.
    pub fn protocol_kind(&self) -> Option<Protocol> {
        self.protocol.parse().ok()
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

impl PartialEq for DiscoveredServer {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for DiscoveredServer {}

impl Hash for DiscoveredServer {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

impl std::fmt::Display for DiscoveredServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}:{}) - {}",
            self.name,
            self.address,
            self.port,
            self.protocol.to_uppercase()
        )
    }
}
