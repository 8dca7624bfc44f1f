//! # AggSync Aggregator
//!
//! Usage: `aggsync-server [port]`
//!
//! Further settings come from `AGGSYNC_*` environment variables, see
//! [`ServerConfig::from_env`].

use aggsync_server::{Server, ServerConfig};
use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting AggSync aggregator"
    );

    // Load configuration
    let port_arg = std::env::args().nth(1);
    let config = ServerConfig::from_env()?.with_port_arg(port_arg.as_deref())?;

    let server = Server::bind(&config).await?;

    // Run aggregator
    server.run().await?;

    Ok(())
}
