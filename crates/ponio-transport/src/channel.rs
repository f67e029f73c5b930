//! Serialized command channel.
//!
//! # Lifecycle
//!
//! ```text
//! 1. CommandChannel::new(&config)         ← spawns the worker task
//! 2. channel.connect(host, port).await    ← opens the transport, sends CONNECT
//! 3. channel.send("BTN_A:1")              ← fire-and-forget, any number of times
//! 4. channel.disconnect().await           ← sends DISCONNECT, closes
//! 5. channel.shutdown().await             ← optional: stop the worker
//! ```
//!
//! Requests are queued the moment the method is called, not when the returned
//! future is first polled, so the execution order is the call order.

use std::future::Future;

use bytes::Bytes;
use ponio_core::{ChannelError, ClientConfig, Command, Protocol, TransportError};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::transport::{default_factory, Transport, TransportFactory};

// MARK: - Status

/// Snapshot published by the worker after every state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatus {
    pub connected: bool,
    pub protocol: Protocol,
}

// MARK: - Jobs

enum Job {
    Connect {
        address: String,
        port: u16,
        reply: oneshot::Sender<Result<String, ChannelError>>,
    },
    Send(String),
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    SetProtocol(Protocol),
}

// MARK: - CommandChannel

/// Handle to the command channel. Construct one per application and pass it to
/// whatever produces input events.
///
/// Must be created inside a tokio runtime. Dropping the handle lets the worker
/// drain the queued jobs, disconnect and exit.
pub struct CommandChannel {
    jobs: mpsc::UnboundedSender<Job>,
    status: watch::Receiver<ChannelStatus>,
    worker: JoinHandle<()>,
}

impl CommandChannel {
    /// Channel using the stock transports for `config.protocol`.
    pub fn new(config: &ClientConfig) -> Self {
        Self::with_factory(config, default_factory(config))
    }

    /// Channel whose transports come from `factory`.
    pub fn with_factory(config: &ClientConfig, factory: TransportFactory) -> Self {
        let protocol = config.protocol;
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus {
            connected: false,
            protocol,
        });

        let worker = Worker {
            transport: factory(protocol),
            liveness: None,
            factory,
            protocol,
            client_name: config.client_name.clone(),
            connected: false,
            status: status_tx,
        };

        Self {
            jobs: jobs_tx,
            status: status_rx,
            worker: tokio::spawn(worker.run(jobs_rx)),
        }
    }

    /// Connect to `address:port` and send the `CONNECT` handshake.
    ///
    /// Resolves with a human-readable status line on success. Callers should
    /// wait for the outcome before connecting again; overlapping requests run
    /// one after the other, each replacing the previous connection.
    pub fn connect(
        &self,
        address: impl Into<String>,
        port: u16,
    ) -> impl Future<Output = Result<String, ChannelError>> + Send + 'static {
        let (reply, outcome) = oneshot::channel();
        let queued = self.enqueue(Job::Connect {
            address: address.into(),
            port,
            reply,
        });
        async move {
            if !queued {
                return Err(ChannelError::WorkerStopped);
            }
            outcome.await.unwrap_or(Err(ChannelError::WorkerStopped))
        }
    }

    /// Send `DISCONNECT` if connected, then close the transport.
    ///
    /// Resolves exactly once, whether or not the close succeeded.
    pub fn disconnect(&self) -> impl Future<Output = ()> + Send + 'static {
        let (reply, done) = oneshot::channel();
        let queued = self.enqueue(Job::Disconnect { reply });
        async move {
            if queued {
                let _ = done.await;
            }
        }
    }

    /// Queue one command line; `\n` is appended on the wire.
    ///
    /// Never blocks. While disconnected the command is dropped with a log
    /// line and nothing reaches the transport.
    pub fn send(&self, command: impl Into<String>) {
        self.enqueue(Job::Send(command.into()));
    }

    pub fn send_command(&self, command: &Command) {
        self.send(command.to_string());
    }

    /// Replace the transport with one for `protocol`. Call while disconnected.
    pub fn set_protocol(&self, protocol: Protocol) {
        self.enqueue(Job::SetProtocol(protocol));
    }

    /// Last connected state published by the worker.
    pub fn is_connected(&self) -> bool {
        self.status.borrow().connected
    }

    pub fn protocol(&self) -> Protocol {
        self.status.borrow().protocol
    }

    /// Watch the channel status, e.g. to notice a dropped connection.
    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    /// Stop accepting work, let the worker finish queued jobs and disconnect,
    /// and wait for it to exit.
    pub async fn shutdown(self) {
        let Self { jobs, worker, .. } = self;
        drop(jobs);
        if let Err(e) = worker.await {
            warn!("Command channel worker ended abnormally: {}", e);
        }
    }

    fn enqueue(&self, job: Job) -> bool {
        if self.jobs.send(job).is_err() {
            warn!("Command channel worker has stopped; request dropped");
            return false;
        }
        true
    }
}

// MARK: - Worker

struct Worker {
    transport: Box<dyn Transport>,
    /// Close signal of the open connection, if the transport offers one.
    liveness: Option<watch::Receiver<bool>>,
    factory: TransportFactory,
    protocol: Protocol,
    client_name: String,
    connected: bool,
    status: watch::Sender<ChannelStatus>,
}

impl Worker {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<Job>) {
        debug!("Command channel worker started");
        loop {
            let wake = tokio::select! {
                job = jobs.recv() => Wake::Job(job),
                () = peer_closed(&mut self.liveness) => Wake::PeerClosed,
            };
            let job = match wake {
                Wake::Job(Some(job)) => job,
                Wake::Job(None) => break,
                Wake::PeerClosed => {
                    self.liveness = None;
                    if self.connected {
                        warn!("Server closed the connection");
                        self.set_connected(false);
                    }
                    continue;
                }
            };
            match job {
                Job::Connect { address, port, reply } => {
                    let outcome = self.connect(&address, port).await;
                    let _ = reply.send(outcome);
                }
                Job::Send(command) => self.send(&command).await,
                Job::Disconnect { reply } => {
                    self.disconnect().await;
                    let _ = reply.send(());
                }
                Job::SetProtocol(protocol) => self.set_protocol(protocol).await,
            }
        }
        self.disconnect().await;
        debug!("Command channel worker stopped");
    }

    async fn connect(&mut self, address: &str, port: u16) -> Result<String, ChannelError> {
        if self.transport.is_connected() {
            info!("Closing the current connection before connecting again");
            self.transport.disconnect().await;
        }
        self.liveness = None;
        self.set_connected(false);

        let protocol_name = self.transport.protocol_name();
        info!("Connecting to {}:{} via {}", address, port, protocol_name);
        if let Err(e) = self.transport.connect(address, port).await {
            error!("Connection to {}:{} failed: {}", address, port, e);
            return Err(ChannelError::Connect(e));
        }
        self.liveness = self.transport.liveness();
        self.set_connected(true);

        let hello = Command::connect(&self.client_name, protocol_name);
        if let Err(e) = self.write(&hello.to_string()).await {
            error!("Handshake with {}:{} failed: {}", address, port, e);
            self.liveness = None;
            self.transport.disconnect().await;
            self.set_connected(false);
            return Err(ChannelError::Handshake(e));
        }

        Ok(format!("Connected to {}:{} via {}", address, port, protocol_name))
    }

    async fn send(&mut self, command: &str) {
        if !self.connected {
            warn!("Cannot send command - not connected: {}", command);
            return;
        }
        if !self.transport.is_connected() {
            warn!("Connection lost, dropping command: {}", command);
            self.set_connected(false);
            return;
        }
        match self.write(command).await {
            Ok(()) => debug!("Command sent: {}", command),
            Err(e) => {
                error!("Failed to send command {}: {}", command, e);
                self.set_connected(false);
            }
        }
    }

    async fn disconnect(&mut self) {
        if self.connected && self.transport.is_connected() {
            if let Err(e) = self.write(&Command::Disconnect.to_string()).await {
                warn!("Disconnect notice not delivered: {}", e);
            }
        }
        self.liveness = None;
        self.transport.disconnect().await;
        self.set_connected(false);
    }

    async fn set_protocol(&mut self, protocol: Protocol) {
        if self.connected || self.transport.is_connected() {
            warn!(
                "Switching to {} while connected over {}; closing the connection",
                protocol,
                self.transport.protocol_name()
            );
            self.liveness = None;
            self.transport.disconnect().await;
            self.set_connected(false);
        }
        self.transport = (self.factory)(protocol);
        self.protocol = protocol;
        self.publish();
        info!("Protocol set to {}", protocol);
    }

    async fn write(&mut self, line: &str) -> Result<(), TransportError> {
        self.transport.send(Bytes::from(format!("{}\n", line))).await
    }

    fn set_connected(&mut self, connected: bool) {
        if self.connected != connected {
            self.connected = connected;
            self.publish();
        }
    }

    fn publish(&self) {
        self.status.send_replace(ChannelStatus {
            connected: self.connected,
            protocol: self.protocol,
        });
    }
}

enum Wake {
    Job(Option<Job>),
    PeerClosed,
}

/// Resolves once the watched connection is dead; never while nothing is
/// watched.
async fn peer_closed(liveness: &mut Option<watch::Receiver<bool>>) {
    match liveness {
        Some(alive) => {
            let _ = alive.wait_for(|alive| !*alive).await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    // ── Instrumented transport ───────────────────────────────────────────────

    #[derive(Clone, Default)]
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        alive: Arc<AtomicBool>,
        writes: Arc<AtomicUsize>,
        protocols: Arc<Mutex<Vec<Protocol>>>,
    }

    impl Recorder {
        fn record(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[derive(Clone, Copy, Default)]
    struct Script {
        refuse_connect: bool,
        fail_write_at: Option<usize>,
    }

    struct MockTransport {
        recorder: Recorder,
        script: Script,
        open: bool,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
            self.recorder.record(format!("connect {address}:{port}"));
            if self.script.refuse_connect {
                return Err(TransportError::Connect {
                    address: address.to_owned(),
                    port,
                    error: io::Error::from(io::ErrorKind::ConnectionRefused),
                });
            }
            self.open = true;
            self.recorder.alive.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn disconnect(&mut self) {
            if self.open {
                self.recorder.record("close".into());
            }
            self.open = false;
            self.recorder.alive.store(false, Ordering::SeqCst);
        }

        async fn send(&mut self, data: Bytes) -> Result<(), TransportError> {
            if !self.is_connected() {
                return Ok(());
            }
            let text = String::from_utf8(data.to_vec()).unwrap();
            let index = self.recorder.writes.fetch_add(1, Ordering::SeqCst);
            if self.script.fail_write_at == Some(index) {
                self.recorder.record(format!("failed {text}"));
                self.recorder.alive.store(false, Ordering::SeqCst);
                return Err(TransportError::SendFailed {
                    error: io::Error::from(io::ErrorKind::BrokenPipe),
                });
            }
            self.recorder.record(format!("write {text}"));
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.open && self.recorder.alive.load(Ordering::SeqCst)
        }

        fn protocol_name(&self) -> &'static str {
            "TCP"
        }
    }

    fn instrumented(script: Script) -> (CommandChannel, Recorder) {
        let recorder = Recorder::default();
        let factory_recorder = recorder.clone();
        let factory: TransportFactory = Arc::new(move |protocol| {
            factory_recorder.protocols.lock().unwrap().push(protocol);
            Box::new(MockTransport {
                recorder: factory_recorder.clone(),
                script,
                open: false,
            })
        });
        let config = ClientConfig {
            client_name: "Test Pad".into(),
            ..ClientConfig::default()
        };
        (CommandChannel::with_factory(&config, factory), recorder)
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn operations_run_in_call_order() {
        let (channel, recorder) = instrumented(Script::default());

        let connected = channel.connect("10.0.0.5", 8888);
        channel.send("BTN_A:1");
        channel.send("BTN_A:0");
        let closed = channel.disconnect();
        channel.send("BTN_B:1");

        assert_eq!(connected.await.unwrap(), "Connected to 10.0.0.5:8888 via TCP");
        closed.await;
        channel.shutdown().await;

        assert_eq!(
            recorder.entries(),
            vec![
                "connect 10.0.0.5:8888",
                "write CONNECT:Test Pad [TCP]\n",
                "write BTN_A:1\n",
                "write BTN_A:0\n",
                "write DISCONNECT\n",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_senders_keep_their_own_order() {
        let (channel, recorder) = instrumented(Script::default());
        let channel = Arc::new(channel);
        channel.connect("10.0.0.5", 8888).await.unwrap();

        let mut tasks = Vec::new();
        for sender in 0..4 {
            let channel = channel.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..25 {
                    channel.send(format!("T{sender}:{n}"));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        channel.disconnect().await;

        let entries = recorder.entries();
        assert_eq!(entries.first().map(String::as_str), Some("connect 10.0.0.5:8888"));
        assert_eq!(entries.last().map(String::as_str), Some("close"));
        assert_eq!(entries[entries.len() - 2], "write DISCONNECT\n");

        for sender in 0..4 {
            let prefix = format!("write T{sender}:");
            let seen: Vec<usize> = entries
                .iter()
                .filter_map(|e| e.strip_prefix(&prefix))
                .map(|n| n.trim_end().parse().unwrap())
                .collect();
            assert_eq!(seen, (0..25).collect::<Vec<_>>());
        }
    }

    #[tokio::test]
    async fn send_while_disconnected_never_reaches_transport() {
        let (channel, recorder) = instrumented(Script::default());

        channel.send("BTN_A:1");
        channel.send_command(&Command::press(ponio_core::Button::B));
        channel.disconnect().await;

        assert!(!channel.is_connected());
        assert_eq!(recorder.writes.load(Ordering::SeqCst), 0);
        assert!(recorder.entries().is_empty());
    }

    #[tokio::test]
    async fn write_failure_drops_later_sends_until_reconnect() {
        // write 0 = handshake, write 1 = BTN_A:1 fails
        let (channel, recorder) = instrumented(Script {
            fail_write_at: Some(1),
            ..Script::default()
        });
        let mut status = channel.subscribe();

        channel.connect("10.0.0.5", 8888).await.unwrap();
        assert!(channel.is_connected());

        channel.send("BTN_A:1");
        status.wait_for(|s| !s.connected).await.unwrap();
        assert!(!channel.is_connected());

        channel.send("BTN_B:1");
        channel.send("BTN_X:1");
        channel.disconnect().await;
        assert_eq!(recorder.writes.load(Ordering::SeqCst), 2);

        channel.connect("10.0.0.5", 8888).await.unwrap();
        channel.send("BTN_Y:1");
        channel.disconnect().await;

        assert_eq!(
            recorder.entries(),
            vec![
                "connect 10.0.0.5:8888",
                "write CONNECT:Test Pad [TCP]\n",
                "failed BTN_A:1\n",
                "close",
                "connect 10.0.0.5:8888",
                "write CONNECT:Test Pad [TCP]\n",
                "write BTN_Y:1\n",
                "write DISCONNECT\n",
                "close",
            ]
        );
    }

    #[tokio::test]
    async fn dead_socket_is_not_masked_by_connected_flag() {
        let (channel, recorder) = instrumented(Script::default());
        channel.connect("10.0.0.5", 8888).await.unwrap();
        let writes_after_connect = recorder.writes.load(Ordering::SeqCst);

        // Peer vanished: the transport knows, the channel flag does not yet.
        recorder.alive.store(false, Ordering::SeqCst);
        channel.send("BTN_A:1");
        channel.disconnect().await;

        assert_eq!(recorder.writes.load(Ordering::SeqCst), writes_after_connect);
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn refused_connect_reports_reason() {
        let (channel, recorder) = instrumented(Script {
            refuse_connect: true,
            ..Script::default()
        });

        let err = channel.connect("10.0.0.5", 8888).await.unwrap_err();

        assert!(matches!(err, ChannelError::Connect(_)));
        assert!(err.to_string().starts_with("Connection failed: "));
        assert!(!channel.is_connected());
        assert_eq!(recorder.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn disconnect_resolves_once_even_when_idle() {
        let (channel, recorder) = instrumented(Script::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let done = channel.disconnect();
        tokio::spawn(async move {
            done.await;
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(recorder.entries().is_empty());
    }

    #[tokio::test]
    async fn set_protocol_rebuilds_transport() {
        let (channel, recorder) = instrumented(Script::default());
        let mut status = channel.subscribe();

        channel.set_protocol(Protocol::Udp);
        status.wait_for(|s| s.protocol == Protocol::Udp).await.unwrap();

        assert_eq!(channel.protocol(), Protocol::Udp);
        assert_eq!(
            *recorder.protocols.lock().unwrap(),
            vec![Protocol::Tcp, Protocol::Udp]
        );
    }

    #[tokio::test]
    async fn shutdown_disconnects_politely() {
        let (channel, recorder) = instrumented(Script::default());
        channel.connect("10.0.0.5", 8888).await.unwrap();

        channel.shutdown().await;

        let entries = recorder.entries();
        assert_eq!(&entries[entries.len() - 2..], ["write DISCONNECT\n", "close"]);
    }

    #[tokio::test]
    async fn end_to_end_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut wire = String::new();
            sock.read_to_string(&mut wire).await.unwrap();
            wire
        });

        let config = ClientConfig {
            connect_timeout_ms: 2_000,
            ..ClientConfig::default()
        };
        let channel = CommandChannel::new(&config);

        let status = channel.connect("127.0.0.1", port).await.unwrap();
        assert_eq!(status, format!("Connected to 127.0.0.1:{port} via TCP"));
        assert!(channel.is_connected());

        channel.send("BTN_A:1");
        channel.disconnect().await;
        assert!(!channel.is_connected());

        let wire = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("server finished")
            .unwrap();
        assert_eq!(
            wire,
            "CONNECT:Ponio Android Gamepad [TCP]\nBTN_A:1\nDISCONNECT\n"
        );
    }

    #[tokio::test]
    async fn status_follows_server_hangup_without_a_send() {
        use tokio::io::{AsyncBufReadExt, BufReader};

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (hang_up, hang_up_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(sock);
            let mut hello = String::new();
            reader.read_line(&mut hello).await.unwrap();
            let _ = hang_up_rx.await;
            drop(reader);
            hello
        });

        let channel = CommandChannel::new(&ClientConfig::default());
        let mut status = channel.subscribe();
        channel.connect("127.0.0.1", port).await.unwrap();
        assert!(channel.is_connected());

        hang_up.send(()).unwrap();
        assert_eq!(server.await.unwrap(), "CONNECT:Ponio Android Gamepad [TCP]\n");

        tokio::time::timeout(Duration::from_secs(2), status.wait_for(|s| !s.connected))
            .await
            .expect("status flips once the server hangs up")
            .unwrap();
        assert!(!channel.is_connected());

        channel.disconnect().await;
        channel.shutdown().await;
    }
}
