//! Aggregator runtime orchestration.

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::state::Aggregator;
use anyhow::{Context, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;
use uuid::Uuid;

/// The listening aggregator.
pub struct Server {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl Server {
    /// Bind the listener and create the aggregator state.
    ///
    /// # Errors
    ///
    /// Returns error if the listen address cannot be bound.
    pub async fn bind(config: &ServerConfig) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        let aggregator = Aggregator::new(config.aggregator_settings());
        let dispatcher = Dispatcher::new(aggregator, config.frame_limits(), config.read_timeout);

        tracing::info!(
            %addr,
            eviction_secs = config.eviction_window.as_secs(),
            read_timeout_secs = config.read_timeout.as_secs(),
            clock_rule = %config.clock_rule,
            "Aggregator bound"
        );

        Ok(Self {
            listener,
            dispatcher,
        })
    }

    /// Address actually bound (useful with port 0).
    ///
    /// # Errors
    ///
    /// Returns error if the socket address cannot be read.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("Failed to read listener address")
    }

    /// Shared aggregator state served by this server.
    #[must_use]
    pub fn aggregator(&self) -> Aggregator {
        self.dispatcher.aggregator().clone()
    }

    /// Run until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error only if the runtime itself fails; per-connection
    /// failures are logged and never end the loop.
    pub async fn run(self) -> Result<()> {
        self.run_until(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown signal received");
        })
        .await
    }

    /// Run until `shutdown` completes.
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for symmetry with [`Server::run`].
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!("Aggregator running, press Ctrl+C to stop");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => {
                            tracing::error!(error = %e, "Failed to accept connection");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }

                () = &mut shutdown => break,
            }
        }

        tracing::info!("Aggregator stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let dispatcher = self.dispatcher.clone();
        let span = tracing::info_span!("connection", id = %Uuid::new_v4(), %peer);

        tokio::spawn(
            async move {
                tracing::debug!("Entity connected");
                match dispatcher.handle(stream).await {
                    Ok(status) => tracing::debug!(%status, "Connection closed"),
                    Err(err) => tracing::warn!(error = %err, "Connection aborted"),
                }
            }
            .instrument(span),
        );
    }
}
