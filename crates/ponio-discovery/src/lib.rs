//! ponio-discovery: find Ponio servers without manual IP entry.
//!
//! # Protocol (UDP, port 8889)
//!
//! ```text
//! client ── "PONIO_DISCOVER" ──► 192.168.1.255:8889, 255.255.255.255:8889
//! server ── "PONIO_SERVER:<name>:<port>:<protocol>" ──► client
//! ```
//!
//! One scan lasts a fixed budget (3 s by default). Every distinct
//! `(address, port)` is reported as soon as it answers, and the full list is
//! reported when the budget runs out.
//!
//! # Usage
//!
//! ```rust,no_run
//! use ponio_core::DiscoveryConfig;
//! use ponio_discovery::{ScanEvent, ServerDiscovery};
//!
//! # async fn demo() -> Result<(), ponio_core::DiscoveryError> {
//! let discovery = ServerDiscovery::new(DiscoveryConfig::default());
//! let mut events = discovery.scan_for_servers()?;
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ScanEvent::ServerFound(server) => println!("found {server}"),
//!         ScanEvent::Completed(all) => println!("{} server(s)", all.len()),
//!         ScanEvent::Error(reason) => eprintln!("scan failed: {reason}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod interfaces;
pub mod response;
pub mod scanner;

pub use interfaces::{broadcast_targets, local_ipv4_addresses};
pub use response::parse_server_response;
pub use scanner::{ScanEvent, ScanSession, ServerDiscovery};
