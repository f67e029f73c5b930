//! Local interface enumeration and broadcast target selection.
//!
//! Interfaces are read from `/sys/class/net/<iface>/flags`; their IPv4
//! addresses come from `ip -4 -o addr show dev <iface>`. Where neither is
//! available the primary LAN address is found by routing a UDP socket.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::Path;

use tracing::{debug, warn};

const IFF_UP: u32 = 0x1;
const IFF_LOOPBACK: u32 = 0x8;

/// Subnet broadcasts for `local` (lowest octet set to 255, i.e. a /24
/// assumption) followed by the limited broadcast `255.255.255.255`.
///
/// Only private (site-local) addresses contribute; duplicates are removed and
/// the order of first appearance is kept.
pub fn broadcast_targets(local: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
    let mut targets: Vec<Ipv4Addr> = Vec::new();
    for addr in local {
        if addr.is_loopback() || !addr.is_private() {
            continue;
        }
        let [a, b, c, _] = addr.octets();
        let broadcast = Ipv4Addr::new(a, b, c, 255);
        if !targets.contains(&broadcast) {
            targets.push(broadcast);
        }
    }
    if !targets.contains(&Ipv4Addr::BROADCAST) {
        targets.push(Ipv4Addr::BROADCAST);
    }
    targets
}

/// IPv4 addresses of every up, non-loopback interface.
pub fn local_ipv4_addresses() -> Vec<Ipv4Addr> {
    let mut found = Vec::new();

    let net_dir = Path::new("/sys/class/net");
    match std::fs::read_dir(net_dir) {
        Ok(entries) => {
            for entry in entries.flatten() {
                let Ok(name) = entry.file_name().into_string() else {
                    continue;
                };
                let flags = std::fs::read_to_string(entry.path().join("flags"))
                    .ok()
                    .and_then(|raw| parse_if_flags(&raw));
                match flags {
                    Some(f) if f & IFF_UP != 0 && f & IFF_LOOPBACK == 0 => {}
                    _ => continue,
                }
                let addrs = interface_ipv4(&name);
                debug!("Interface {} is up with {:?}", name, addrs);
                found.extend(addrs);
            }
        }
        Err(e) => debug!("Cannot list {}: {}", net_dir.display(), e),
    }

    if found.is_empty() {
        match primary_ipv4() {
            Some(ip) => found.push(ip),
            None => warn!("No local IPv4 address found; only the limited broadcast will be probed"),
        }
    }
    found
}

fn interface_ipv4(iface: &str) -> Vec<Ipv4Addr> {
    match std::process::Command::new("ip")
        .args(["-4", "-o", "addr", "show", "dev", iface])
        .output()
    {
        Ok(output) => parse_inet_addrs(&String::from_utf8_lossy(&output.stdout)),
        Err(e) => {
            debug!("`ip addr` unavailable for {}: {}", iface, e);
            Vec::new()
        }
    }
}

/// Address of the interface the OS would route external traffic through.
/// No packets are sent.
fn primary_ipv4() -> Option<Ipv4Addr> {
    let probe = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    probe.connect((Ipv4Addr::new(8, 8, 8, 8), 80)).ok()?;
    match probe.local_addr().ok()?.ip() {
        IpAddr::V4(ip) if !ip.is_loopback() && !ip.is_unspecified() => Some(ip),
        _ => None,
    }
}

/// `/sys/class/net/<iface>/flags` holds a hex word such as `0x1003`.
fn parse_if_flags(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(hex, 16).ok()
}

/// Extract addresses from one-line `ip -4 -o addr` output:
/// `3: wlan0    inet 192.168.1.23/24 brd 192.168.1.255 scope global wlan0`
fn parse_inet_addrs(output: &str) -> Vec<Ipv4Addr> {
    output
        .lines()
        .filter_map(|line| {
            let mut words = line.split_whitespace();
            words.find(|w| *w == "inet")?;
            words.next()?.split('/').next()?.parse().ok()
        })
        .collect()
}
