//! ponio-transport: the client side of the Ponio command channel.
//!
//! # Architecture
//!
//! ```text
//! front end (buttons / sticks)          Ponio server
//! ────────────────────────────          ─────────────
//! CommandChannel::send ──► job queue ──► worker task ──► Transport (TCP:8888)
//! ```
//!
//! Every operation issued on a [`CommandChannel`] is queued and executed by a
//! single worker task in call order, so a `send` can never overtake the
//! `connect` before it or race the `disconnect` after it.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use ponio_core::{Button, ClientConfig, Command};
//! use ponio_transport::CommandChannel;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let channel = CommandChannel::new(&ClientConfig::default());
//! let status = channel.connect("192.168.1.9", 8888).await?;
//! println!("{status}");
//!
//! channel.send_command(&Command::press(Button::A));
//! channel.send_command(&Command::release(Button::A));
//!
//! channel.disconnect().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod tcp;
pub mod transport;

pub use channel::{ChannelStatus, CommandChannel};
pub use tcp::TcpTransport;
pub use transport::{create_transport, default_factory, Transport, TransportFactory};
