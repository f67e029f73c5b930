//! ponio-core: shared types for the Ponio gamepad client.
//!
//! Everything the transport and discovery crates agree on lives here: the
//! textual command vocabulary sent to a Ponio server, the discovered-server
//! record, the error enums and the configuration structs.

pub mod command;
pub mod config;
pub mod errors;
pub mod types;

pub use command::{axis_from_fraction, Button, Command, Stick};
pub use config::{ClientConfig, DiscoveryConfig};
pub use errors::{ChannelError, DiscoveryError, TransportError};
pub use types::*;

/// Default TCP port a Ponio server listens on for the command channel.
pub const DEFAULT_SERVER_PORT: u16 = 8888;

/// UDP port servers listen on for discovery probes.
pub const DISCOVERY_PORT: u16 = 8889;

/// Probe payload broadcast by the client.
pub const DISCOVERY_PROBE: &str = "PONIO_DISCOVER";

/// Prefix of every server reply to a discovery probe.
pub const SERVER_RESPONSE_PREFIX: &str = "PONIO_SERVER:";

/// Label sent in the `CONNECT` handshake unless configured otherwise.
pub const DEFAULT_CLIENT_NAME: &str = "Ponio Android Gamepad";
