use std::net::IpAddr;

use ponio_core::{DiscoveredServer, SERVER_RESPONSE_PREFIX};

/// Parse `PONIO_SERVER:<name>:<port>:<protocol>` received from `source`.
///
/// Returns `None` for anything else: missing prefix, a field count other than
/// three after the prefix, an empty name, or a port that is not a `u16`.
/// Trailing whitespace (a server may newline-terminate its reply) is ignored.
pub fn parse_server_response(payload: &str, source: IpAddr) -> Option<DiscoveredServer> {
    let body = payload.trim_end().strip_prefix(SERVER_RESPONSE_PREFIX)?;
    let fields: Vec<&str> = body.split(':').collect();
    let [name, port, protocol] = fields.as_slice() else {
        return None;
    };
    if name.is_empty() {
        return None;
    }
    let port: u16 = port.parse().ok()?;
    Some(DiscoveredServer::new(*name, source.to_string(), port, *protocol))
}
