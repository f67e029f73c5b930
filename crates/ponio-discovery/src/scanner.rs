use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ponio_core::{DiscoveredServer, DiscoveryConfig, DiscoveryError, DISCOVERY_PROBE, SERVER_RESPONSE_PREFIX};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::interfaces::{broadcast_targets, local_ipv4_addresses};
use crate::response::parse_server_response;

/// Progress of one scan, in delivery order: zero or more `ServerFound`, then
/// exactly one `Completed` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    ServerFound(DiscoveredServer),
    Completed(Vec<DiscoveredServer>),
    Error(String),
}

// MARK: - ScanSession

/// State of one bounded scan: the deadline and every distinct server seen.
#[derive(Debug)]
pub struct ScanSession {
    deadline: Instant,
    seen: HashSet<DiscoveredServer>,
    servers: Vec<DiscoveredServer>,
}

impl ScanSession {
    pub fn new(budget: Duration) -> Self {
        Self {
            deadline: Instant::now() + budget,
            seen: HashSet::new(),
            servers: Vec::new(),
        }
    }

    /// Time left before the deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Record `server`. Returns `false` if its `(address, port)` was already
    /// seen in this session; the first occurrence wins.
    pub fn offer(&mut self, server: DiscoveredServer) -> bool {
        if !self.seen.insert(server.clone()) {
            return false;
        }
        self.servers.push(server);
        true
    }

    pub fn servers(&self) -> &[DiscoveredServer] {
        &self.servers
    }

    pub fn into_servers(self) -> Vec<DiscoveredServer> {
        self.servers
    }
}

// MARK: - ServerDiscovery

/// UDP broadcast scanner. At most one scan runs at a time per instance;
/// clones share the scanning and stop flags.
#[derive(Debug, Clone)]
pub struct ServerDiscovery {
    config: DiscoveryConfig,
    scanning: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
}

impl ServerDiscovery {
    pub fn new(config: DiscoveryConfig) -> Self {
        Self {
            config,
            scanning: Arc::new(AtomicBool::new(false)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start a scan on a background task and return its event stream.
    ///
    /// Must be called from within a tokio runtime. Fails with
    /// [`DiscoveryError::ScanInProgress`] while another scan is running, in
    /// which case the running scan is left untouched.
    pub fn scan_for_servers(&self) -> Result<mpsc::UnboundedReceiver<ScanEvent>, DiscoveryError> {
        let config = self.config.clone();
        let stop = self.stop.clone();
        self.spawn_scan(move |events| async move { run_scan(&config, &stop, &events).await })
    }

    /// Claim the scanning flag and drive `scan` on a new task, reporting its
    /// outcome as the final event.
    fn spawn_scan<F, Fut>(&self, scan: F) -> Result<mpsc::UnboundedReceiver<ScanEvent>, DiscoveryError>
    where
        F: FnOnce(mpsc::UnboundedSender<ScanEvent>) -> Fut,
        Fut: Future<Output = Result<Vec<DiscoveredServer>, DiscoveryError>> + Send + 'static,
    {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!("[Discovery] Scan already in progress, request ignored");
            return Err(DiscoveryError::ScanInProgress);
        }
        self.stop.store(false, Ordering::Release);

        let (tx, rx) = mpsc::unbounded_channel();
        let guard = ScanningGuard(self.scanning.clone());
        let scan = scan(tx.clone());

        tokio::spawn(async move {
            let outcome = scan.await;
            // Idle again before the final event, so a listener may rescan
            // straight from its completion handler.
            drop(guard);
            let event = match outcome {
                Ok(servers) => {
                    info!("[Discovery] Scan complete: {} server(s)", servers.len());
                    ScanEvent::Completed(servers)
                }
                Err(e) => {
                    error!("[Discovery] Scan failed: {}", e);
                    ScanEvent::Error(e.to_string())
                }
            };
            let _ = tx.send(event);
        });

        Ok(rx)
    }

    /// Run a scan to completion and return every server found.
    pub async fn scan(&self) -> Result<Vec<DiscoveredServer>, DiscoveryError> {
        outcome(self.scan_for_servers()?).await
    }

    /// Ask the running scan to finish early. It completes normally with the
    /// servers found so far at its next receive wait.
    pub fn stop_scan(&self) {
        if self.is_scanning() {
            debug!("[Discovery] Stop requested");
        }
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Acquire)
    }
}

/// Drain `events` down to the final outcome.
async fn outcome(mut events: mpsc::UnboundedReceiver<ScanEvent>) -> Result<Vec<DiscoveredServer>, DiscoveryError> {
    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::ServerFound(_) => {}
            ScanEvent::Completed(servers) => return Ok(servers),
            ScanEvent::Error(reason) => return Err(DiscoveryError::ScanFailed { reason }),
        }
    }
    Err(DiscoveryError::ScanFailed {
        reason: "scan task ended without reporting".into(),
    })
}

struct ScanningGuard(Arc<AtomicBool>);

impl Drop for ScanningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// MARK: - Scan loop

async fn run_scan(
    config: &DiscoveryConfig,
    stop: &AtomicBool,
    events: &mpsc::UnboundedSender<ScanEvent>,
) -> Result<Vec<DiscoveredServer>, DiscoveryError> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.set_broadcast(true)?;

    let targets = if config.targets.is_empty() {
        match tokio::task::spawn_blocking(local_ipv4_addresses).await {
            Ok(local) => broadcast_targets(&local),
            Err(e) => {
                warn!("[Discovery] Interface enumeration failed: {}", e);
                broadcast_targets(&[])
            }
        }
    } else {
        config.targets.clone()
    };

    let mut session = ScanSession::new(config.scan_timeout());
    info!(
        "[Discovery] Probing {} target(s) on port {} for {:?}",
        targets.len(),
        config.discovery_port,
        config.scan_timeout()
    );
    for ip in &targets {
        let dest = SocketAddrV4::new(*ip, config.discovery_port);
        match socket.send_to(DISCOVERY_PROBE.as_bytes(), dest).await {
            Ok(_) => debug!("[Discovery] Probe sent to {}", dest),
            Err(e) => warn!("[Discovery] Probe to {} failed: {}", dest, e),
        }
    }

    receive_replies(&socket, &mut session, stop, config.recv_poll_interval(), events).await?;
    Ok(session.into_servers())
}

/// Anything datagrams can be read from; the scan loop only needs this much.
#[async_trait]
trait DatagramSource: Sync {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[async_trait]
impl DatagramSource for UdpSocket {
    async fn recv_datagram(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.recv_from(buf).await
    }
}

/// Collect replies into `session` until its deadline passes or `stop` is
/// raised. Only a non-transient receive error ends it early.
async fn receive_replies(
    source: &impl DatagramSource,
    session: &mut ScanSession,
    stop: &AtomicBool,
    poll: Duration,
    events: &mpsc::UnboundedSender<ScanEvent>,
) -> Result<(), DiscoveryError> {
    let mut buf = [0u8; 1024];
    loop {
        if stop.load(Ordering::Acquire) {
            info!("[Discovery] Scan stopped early");
            break;
        }
        let remaining = session.remaining();
        if remaining.is_zero() {
            break;
        }

        let (len, from) = match timeout(remaining.min(poll), source.recv_datagram(&mut buf)).await {
            Err(_) => continue,
            Ok(Ok(received)) => received,
            Ok(Err(e)) if is_transient(&e) => {
                debug!("[Discovery] Ignoring receive error: {}", e);
                continue;
            }
            Ok(Err(e)) => return Err(DiscoveryError::Socket(e)),
        };

        let payload = String::from_utf8_lossy(&buf[..len]);
        if !payload.starts_with(SERVER_RESPONSE_PREFIX) {
            trace!("[Discovery] Ignoring {} byte datagram from {}", len, from);
            continue;
        }
        match parse_server_response(&payload, from.ip()) {
            Some(server) => {
                if session.offer(server.clone()) {
                    info!("[Discovery] Found {}", server);
                    let _ = events.send(ScanEvent::ServerFound(server));
                }
            }
            None => debug!("[Discovery] Malformed reply from {}: {:?}", from, payload),
        }
    }
    Ok(())
}

/// ICMP feedback and spurious wakeups surface as receive errors on some
/// platforms; none of them invalidate the socket.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
    )
}
