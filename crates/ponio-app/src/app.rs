use anyhow::{anyhow, bail, Context, Result};
use ponio_core::{ClientConfig, DiscoveredServer, DiscoveryConfig};
use ponio_discovery::{ScanEvent, ServerDiscovery};
use ponio_transport::CommandChannel;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::{Cli, Commands};

/// Dispatch the parsed command line.
///
/// Configuration is layered: defaults, then `PONIO_*` environment variables,
/// then command-line flags.
pub async fn run(cli: Cli) -> Result<()> {
    let client = cli.client_config(ClientConfig::from_env());
    match &cli.command {
        Commands::Scan { connect, .. } => {
            let servers = scan(cli.discovery_config(DiscoveryConfig::from_env())).await?;
            let Some(choice) = connect else {
                return Ok(());
            };
            let server = pick_server(&servers, choice)
                .ok_or_else(|| anyhow!("no discovered server matches {choice:?}"))?;
            let channel = connect_discovered(&client, server).await?;
            forward_stdin(channel, &server.address, server.port).await
        }
        Commands::Connect { host, port } => {
            let (address, port) = resolve_endpoint(host, *port, client.default_port)?;
            let channel = open_channel(CommandChannel::new(&client), &address, port).await?;
            forward_stdin(channel, &address, port).await
        }
        Commands::Send { host, port, commands } => {
            let (address, port) = resolve_endpoint(host, *port, client.default_port)?;
            send_batch(&client, &address, port, commands).await
        }
    }
}

// ── scan ──────────────────────────────────────────────────────────────────────

/// Scan, listing servers with a 1-based index as they answer.
async fn scan(config: DiscoveryConfig) -> Result<Vec<DiscoveredServer>> {
    let discovery = ServerDiscovery::new(config);
    let mut events = discovery.scan_for_servers()?;

    let stopper = discovery.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stopper.stop_scan();
        }
    });

    let mut outcome = Err(anyhow!("scan ended without a result"));
    let mut found = 0;
    while let Some(event) = events.recv().await {
        match event {
            ScanEvent::ServerFound(server) => {
                found += 1;
                println!("  [{found}] {server}");
            }
            ScanEvent::Completed(servers) => {
                if servers.is_empty() {
                    println!("No servers found. Make sure the server is running on the same network.");
                } else {
                    println!("{} server(s) found", servers.len());
                }
                outcome = Ok(servers);
            }
            ScanEvent::Error(reason) => outcome = Err(anyhow!("Scan failed: {reason}")),
        }
    }
    ctrl_c.abort();
    outcome
}

// ── connect ───────────────────────────────────────────────────────────────────

/// Select a scan result by its listed index or, case-insensitively, by name.
fn pick_server<'a>(servers: &'a [DiscoveredServer], choice: &str) -> Option<&'a DiscoveredServer> {
    let choice = choice.trim();
    if let Ok(index) = choice.parse::<usize>() {
        return index.checked_sub(1).and_then(|i| servers.get(i));
    }
    servers.iter().find(|s| s.name.eq_ignore_ascii_case(choice))
}

/// Connect to a discovered server over the protocol it advertises.
async fn connect_discovered(client: &ClientConfig, server: &DiscoveredServer) -> Result<CommandChannel> {
    let protocol = server.protocol_kind().unwrap_or_else(|| {
        warn!(
            "{} advertises unknown protocol {:?}, using {}",
            server.name, server.protocol, client.protocol
        );
        client.protocol
    });
    let channel = CommandChannel::new(client);
    channel.set_protocol(protocol);
    open_channel(channel, &server.address, server.port).await
}

async fn open_channel(channel: CommandChannel, address: &str, port: u16) -> Result<CommandChannel> {
    match channel.connect(address, port).await {
        Ok(status) => {
            info!("{}", status);
            Ok(channel)
        }
        Err(e) => {
            channel.shutdown().await;
            Err(e).with_context(|| format!("could not connect to {address}:{port}"))
        }
    }
}

async fn forward_stdin(channel: CommandChannel, address: &str, port: u16) -> Result<()> {
    println!("Connected. Type commands (e.g. BTN_A:1), `quit` or Ctrl-D to leave.");

    let mut status = channel.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                let line = line.trim();
                match line {
                    "" => continue,
                    "quit" | "exit" => break,
                    command => channel.send(command),
                }
            }
            changed = status.changed() => {
                if changed.is_err() || !status.borrow().connected {
                    warn!("Connection to {}:{} lost", address, port);
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    channel.disconnect().await;
    channel.shutdown().await;
    Ok(())
}

async fn send_batch(client: &ClientConfig, address: &str, port: u16, commands: &[String]) -> Result<()> {
    let channel = open_channel(CommandChannel::new(client), address, port).await?;
    for command in commands {
        channel.send(command.as_str());
    }
    channel.disconnect().await;
    channel.shutdown().await;
    info!("Sent {} command(s) to {}:{}", commands.len(), address, port);
    Ok(())
}

/// Split `host[:port]`. An explicit `port` wins over one embedded in `host`;
/// with neither, `default_port` is used.
fn resolve_endpoint(host: &str, port: Option<u16>, default_port: u16) -> Result<(String, u16)> {
    let host = host.trim();
    let (address, embedded) = match host.rsplit_once(':') {
        Some((address, raw)) if !address.contains(':') => {
            let parsed: u16 = raw
                .parse()
                .with_context(|| format!("invalid port {raw:?} in {host:?}"))?;
            (address, Some(parsed))
        }
        _ => (host, None),
    };
    if address.is_empty() {
        bail!("please enter a server address or scan for servers");
    }
    Ok((address.to_owned(), port.or(embedded).unwrap_or(default_port)))
}
