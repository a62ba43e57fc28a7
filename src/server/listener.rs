//! TCP listener / supervisor
//!
//! Owns the listening socket, the connection registry, and the shutdown
//! sequencing. Grounded directly in the teacher's QUIC-era
//! `server::listener::Server`: the same `tokio::select!` accept-or-shutdown
//! loop shape, the same backoff-on-persistent-accept-error behavior, and the
//! same `shutdown()` sequence (signal -> stop accepting -> drain -> force-
//! close stragglers). `Endpoint::accept` becomes `TcpListener::accept`; the
//! per-accept capacity check and `ConnectionHandler::new` + `tokio::spawn`
//! dispatch are unchanged in shape.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::connection::{ConnectionManager, ConnectionManagerConfig};
use crate::friendly_name::FriendlyNames;
use crate::pool::BufferPool;
use crate::util;

use super::handler::ConnectionHandler;

/// Fixed buffer-pool sizing. Not exposed through `proxy.json` — the spec's
/// external interface only surfaces the listen endpoint and the label map.
const BUFFER_COUNT_SMALL: usize = 256;
const BUFFER_COUNT_MEDIUM: usize = 512;
const BUFFER_COUNT_LARGE: usize = 128;

const MAX_CONNECTIONS: usize = 4096;
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// SOCKS5 proxy server: one listening socket, one connection registry.
pub struct Server {
    listener: TcpListener,
    conn_manager: Arc<ConnectionManager>,
    buffer_pool: BufferPool,
    friendly_names: Arc<FriendlyNames>,
    cancel: CancellationToken,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Server {
    /// Bind the listening socket and initialize the buffer pool and
    /// connection registry.
    pub async fn bind(addr: SocketAddr, friendly_names: Arc<FriendlyNames>) -> Result<Self> {
        let listener = util::bind_listener(addr)
            .with_context(|| format!("failed to bind SOCKS5 listener on {addr}"))?;

        let buffer_pool = BufferPool::new(BUFFER_COUNT_SMALL, BUFFER_COUNT_MEDIUM, BUFFER_COUNT_LARGE);
        info!(
            small = BUFFER_COUNT_SMALL,
            medium = BUFFER_COUNT_MEDIUM,
            large = BUFFER_COUNT_LARGE,
            "buffer pool initialized"
        );

        let conn_manager = ConnectionManager::new(ConnectionManagerConfig {
            max_connections: MAX_CONNECTIONS,
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            listener,
            conn_manager,
            buffer_pool,
            friendly_names,
            cancel: CancellationToken::new(),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until a shutdown is signaled via [`Server::shutdown`].
    pub async fn run(&self) -> Result<()> {
        info!(bind_addr = %self.local_addr()?, "accepting SOCKS5 connections");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut consecutive_errors: u32 = 0;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            consecutive_errors = 0;

                            if self.conn_manager.is_full() {
                                warn!(%peer, "connection rejected: registry at capacity");
                                continue;
                            }

                            let handler = ConnectionHandler::new(
                                self.conn_manager.clone(),
                                self.buffer_pool.clone(),
                                self.friendly_names.clone(),
                                self.cancel.clone(),
                            );

                            tokio::spawn(async move {
                                handler.handle(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            consecutive_errors += 1;
                            warn!(error = %e, consecutive_errors, "accept failed");
                            tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("shutdown signal received");
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Stop accepting, let in-flight connections wind down within the drain
    /// window, then force-close anything still open by tripping the shared
    /// cancellation token every tunnel/association select loop watches.
    pub async fn shutdown(&self) {
        info!("initiating graceful shutdown");

        let _ = self.shutdown_tx.send(true);
        self.conn_manager.drain(SHUTDOWN_DRAIN_TIMEOUT).await;

        let remaining = self.conn_manager.connection_count();
        if remaining > 0 {
            warn!(remaining, "force-closing stragglers after drain timeout");
            self.cancel.cancel();
        }

        info!("server shutdown complete");
    }
}
