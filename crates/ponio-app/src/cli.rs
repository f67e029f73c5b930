use std::net::Ipv4Addr;

use clap::{Parser, Subcommand};
use ponio_core::{ClientConfig, DiscoveryConfig, Protocol};

/// ponio: remote gamepad client for Ponio servers
#[derive(Parser, Debug)]
#[command(name = "ponio", version)]
#[command(about = "Discover Ponio servers and send them gamepad commands", long_about = None)]
pub struct Cli {
    /// Label announced in the CONNECT handshake
    #[arg(long, global = true)]
    pub name: Option<String>,

    /// Transport protocol (tcp, udp, bluetooth)
    #[arg(long, global = true)]
    pub protocol: Option<Protocol>,

    /// Connect timeout in milliseconds
    #[arg(long, global = true)]
    pub connect_timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Broadcast a discovery probe and list the servers that answer
    Scan {
        /// Scan duration in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// UDP port servers listen on for probes
        #[arg(long)]
        discovery_port: Option<u16>,

        /// Probe this address instead of the local broadcasts (repeatable)
        #[arg(long = "target")]
        targets: Vec<Ipv4Addr>,

        /// After the scan, connect to this server (listed index or name) and
        /// forward stdin as with `connect`
        #[arg(long, value_name = "INDEX|NAME")]
        connect: Option<String>,
    },

    /// Connect and forward commands typed on stdin, one per line
    Connect {
        /// Server address, optionally with `:port`
        host: String,

        /// Server port (default 8888)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Connect, send the given commands in order, then disconnect
    Send {
        /// Server address, optionally with `:port`
        host: String,

        /// Server port (default 8888)
        #[arg(long)]
        port: Option<u16>,

        /// Command lines, e.g. `BTN_A:1 BTN_A:0 LJOY:0.500,-1.000`
        #[arg(required = true)]
        commands: Vec<String>,
    },
}

impl Cli {
    /// Parse CLI arguments from the environment
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// `base` with the global flags applied.
    pub fn client_config(&self, mut base: ClientConfig) -> ClientConfig {
        if let Some(name) = &self.name {
            base.client_name = name.clone();
        }
        if let Some(protocol) = self.protocol {
            base.protocol = protocol;
        }
        if let Some(ms) = self.connect_timeout_ms {
            base.connect_timeout_ms = ms;
        }
        base
    }

    /// `base` with the `scan` flags applied.
    pub fn discovery_config(&self, mut base: DiscoveryConfig) -> DiscoveryConfig {
        if let Commands::Scan {
            timeout_ms,
            discovery_port,
            targets,
            ..
        } = &self.command
        {
            if let Some(ms) = timeout_ms {
                base.scan_timeout_ms = *ms;
            }
            if let Some(port) = discovery_port {
                base.discovery_port = *port;
            }
            if !targets.is_empty() {
                base.targets = targets.clone();
            }
        }
        base
    }
}
