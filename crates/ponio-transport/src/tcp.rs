//! Plain TCP transport.
//!
//! The stream is split on connect: the write half carries commands, the read
//! half is handed to a watcher task. The server never talks back on this
//! channel, so the watcher only discards stray bytes and notices EOF or read
//! errors. It then flips the liveness watch to `false`, so
//! [`TcpTransport::is_connected`] and every [`Transport::liveness`] receiver
//! see a dead peer without anyone calling `disconnect`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ponio_core::TransportError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::transport::Transport;

pub struct TcpTransport {
    connect_timeout: Duration,
    writer: Option<OwnedWriteHalf>,
    alive: Arc<watch::Sender<bool>>,
    watcher: Option<JoinHandle<()>>,
    peer: String,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            writer: None,
            alive: Arc::new(watch::channel(false).0),
            watcher: None,
            peer: String::new(),
        }
    }

    /// `host:port` of the current (or last) connection.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        self.disconnect().await;

        let stream = match timeout(self.connect_timeout, TcpStream::connect((address, port))).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(error)) => {
                return Err(TransportError::Connect {
                    address: address.to_owned(),
                    port,
                    error,
                })
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    address: address.to_owned(),
                    port,
                    ms: millis(self.connect_timeout),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("TCP_NODELAY not applied: {}", e);
        }

        let (reader, writer) = stream.into_split();
        let alive = Arc::new(watch::channel(true).0);
        self.peer = format!("{}:{}", address, port);
        self.watcher = Some(spawn_watcher(reader, alive.clone(), self.peer.clone()));
        self.alive = alive;
        self.writer = Some(writer);

        info!("TCP connected to {}", self.peer);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.alive.send_replace(false);
        if let Some(handle) = self.watcher.take() {
            handle.abort();
        }
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.shutdown().await {
                warn!("Error while closing TCP stream to {}: {}", self.peer, e);
            }
            info!("TCP disconnected from {}", self.peer);
        }
    }

    async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
        let alive = *self.alive.borrow();
        if !alive {
            return Ok(());
        }
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let written = match writer.write_all(&data).await {
            Ok(()) => writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(error) = written {
            self.alive.send_replace(false);
            return Err(TransportError::SendFailed { error });
        }
        trace!("Wrote {} bytes to {}", data.len(), self.peer);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.writer.is_some() && *self.alive.borrow()
    }

    fn liveness(&self) -> Option<watch::Receiver<bool>> {
        self.writer.as_ref()?;
        Some(self.alive.subscribe())
    }

    fn protocol_name(&self) -> &'static str {
        "TCP"
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.take() {
            handle.abort();
        }
    }
}

/// Milliseconds for error reports, saturating instead of truncating.
fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ── Read-side watcher ─────────────────────────────────────────────────────────

fn spawn_watcher(mut reader: OwnedReadHalf, alive: Arc<watch::Sender<bool>>, peer: String) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("TCP peer {} closed the connection", peer);
                    break;
                }
                Ok(n) => {
                    trace!("Discarding {} unsolicited bytes from {}", n, peer);
                }
                Err(e) => {
                    warn!("TCP read error from {}: {}", peer, e);
                    break;
                }
            }
        }
        alive.send_replace(false);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio::time::{sleep, Instant};

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn writes_bytes_verbatim() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            sock.read_to_end(&mut received).await.unwrap();
            received
        });

        let mut transport = TcpTransport::new(TIMEOUT);
        transport.connect("127.0.0.1", port).await.unwrap();
        assert!(transport.is_connected());
        assert_eq!(transport.peer(), format!("127.0.0.1:{port}"));

        transport.send(Bytes::from_static(b"BTN_A:1")).await.unwrap();
        transport.send(Bytes::from_static(b"\n")).await.unwrap();
        transport.disconnect().await;
        transport.disconnect().await;

        assert!(!transport.is_connected());
        assert_eq!(server.await.unwrap(), b"BTN_A:1\n");
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new(TIMEOUT);
        let err = transport.connect("127.0.0.1", port).await.unwrap_err();

        assert!(err.is_connect_error());
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn send_while_disconnected_is_a_noop() {
        let mut transport = TcpTransport::new(TIMEOUT);
        transport.send(Bytes::from_static(b"BTN_A:1\n")).await.unwrap();
        assert!(!transport.is_connected());
    }

    #[test]
    fn timeout_millis_saturate() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn liveness_only_while_connected() {
        let transport = TcpTransport::new(TIMEOUT);
        assert!(transport.liveness().is_none());
    }

    #[tokio::test]
    async fn notices_peer_close_without_explicit_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);
        });

        let mut transport = TcpTransport::new(TIMEOUT);
        transport.connect("127.0.0.1", port).await.unwrap();
        let mut liveness = transport.liveness().expect("connected transport has liveness");
        server.await.unwrap();

        tokio::time::timeout(TIMEOUT, liveness.wait_for(|alive| !*alive))
            .await
            .expect("liveness flips on peer close")
            .unwrap();
        let deadline = Instant::now() + TIMEOUT;
        while transport.is_connected() && Instant::now() < deadline {
            sleep(Duration::from_millis(10)).await;
        }
        assert!(!transport.is_connected());
    }
}
