use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use ponio_core::{ClientConfig, Protocol, TransportError};
use tokio::sync::watch;
use tracing::warn;

use crate::tcp::TcpTransport;

// MARK: - Transport trait

/// Point-to-point byte stream carrying commands to the server.
///
/// The command channel owns exactly one transport at a time and drives it
/// from its worker task only, hence `&mut self` everywhere.
///
/// Implementations:
/// - [`TcpTransport`]: plain TCP stream
///
/// New variants (UDP datagrams, Bluetooth RFCOMM) plug in by implementing this
/// trait and returning them from a [`TransportFactory`].
#[async_trait]
pub trait Transport: Send {
    /// Open the stream. On error the transport stays disconnected.
    async fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError>;

    /// Close the stream. Idempotent; close errors are logged, not returned.
    async fn disconnect(&mut self);

    /// Write `data` verbatim, without framing.
    ///
    /// A no-op returning `Ok(())` while disconnected.
    async fn send(&mut self, data: Bytes) -> Result<(), TransportError>;

    /// Live state of the underlying stream, not just the last explicit call.
    fn is_connected(&self) -> bool;

    /// Display label, also announced in the `CONNECT` handshake.
    fn protocol_name(&self) -> &'static str;

    /// Receiver for the current connection that turns `false` (or closes)
    /// once the stream dies on its own, e.g. the peer hung up.
    ///
    /// `None` while disconnected or when the transport cannot tell.
    fn liveness(&self) -> Option<watch::Receiver<bool>> {
        None
    }
}

// MARK: - Factory

/// Builds the transport for a requested protocol.
pub type TransportFactory = Arc<dyn Fn(Protocol) -> Box<dyn Transport> + Send + Sync>;

/// Create the transport for `protocol`.
///
/// Only TCP ships; any other protocol falls back to TCP with a warning.
pub fn create_transport(protocol: Protocol, config: &ClientConfig) -> Box<dyn Transport> {
    match protocol {
        Protocol::Tcp => Box::new(TcpTransport::new(config.connect_timeout())),
        other => {
            warn!("{} transport is not available, falling back to TCP", other);
            Box::new(TcpTransport::new(config.connect_timeout()))
        }
    }
}

/// Factory over [`create_transport`] bound to `config`.
pub fn default_factory(config: &ClientConfig) -> TransportFactory {
    let config = config.clone();
    Arc::new(move |protocol| create_transport(protocol, &config))
}
