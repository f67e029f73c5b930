//! ponio: command-line client for Ponio gamepad servers.
//!
//! ```text
//! ponio scan                          list servers answering on UDP 8889
//! ponio connect 192.168.1.9           forward stdin lines as commands
//! ponio send 192.168.1.9 BTN_A:1 BTN_A:0
//! ```
//!
//! Set `RUST_LOG=debug` to see every command as it is written.

use anyhow::Result;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod app;
mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_thread_ids(false)
        .init();

    info!("Ponio client v{}", env!("CARGO_PKG_VERSION"));

    let cli = cli::Cli::parse();
    match app::run(cli).await {
        Ok(()) => Ok(()),
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e)
        }
    }
}
