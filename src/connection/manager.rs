//! Connection manager
//!
//! Manages connection lifecycle and provides fast lookup. This is the
//! active-connections registry required by the concurrency model: handlers
//! insert on accept and remove on exit, the supervisor reads it only during
//! shutdown drain.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::state::{ConnectionId, ConnectionPhase, ConnectionState};
use crate::pool::{ConnectionSlab, SlabHandle};

pub struct ConnectionManagerConfig {
    pub max_connections: usize,
}

/// Manages all active connections.
pub struct ConnectionManager {
    connections: ConnectionSlab<ConnectionState>,
    id_to_handle: DashMap<ConnectionId, SlabHandle>,
    next_id: AtomicU64,
    config: ConnectionManagerConfig,
}

impl ConnectionManager {
    pub fn new(config: ConnectionManagerConfig) -> Arc<Self> {
        Arc::new(Self {
            connections: ConnectionSlab::new(config.max_connections),
            id_to_handle: DashMap::with_capacity(config.max_connections),
            next_id: AtomicU64::new(1),
            config,
        })
    }

    /// Register a newly accepted connection. Returns `None` if the slab is
    /// at capacity.
    pub fn register(&self, client_addr: SocketAddr) -> Option<ConnectionId> {
        let id = ConnectionId::from_raw(self.next_id.fetch_add(1, Ordering::Relaxed));
        let state = ConnectionState::new(id, client_addr);
        let handle = self.connections.insert(state)?;
        self.id_to_handle.insert(id, handle);

        debug!(conn_id = %id, %client_addr, "connection registered");
        Some(id)
    }

    pub fn set_phase(&self, id: ConnectionId, phase: ConnectionPhase) {
        if let Some(handle) = self.id_to_handle.get(&id) {
            if let Some(mut state) = self.connections.get_mut(*handle) {
                state.set_phase(phase);
            }
        }
    }

    /// Remove a connection from the registry and log its summary.
    pub fn unregister(&self, id: ConnectionId) {
        if let Some((_, handle)) = self.id_to_handle.remove(&id) {
            if let Some(state) = self.connections.remove(handle) {
                info!(
                    conn_id = %id,
                    client_addr = %state.client_addr,
                    duration_secs = state.duration().as_secs_f64(),
                    bytes_rx = state.bytes_rx,
                    bytes_tx = state.bytes_tx,
                    "connection closed"
                );
            }
        }
    }

    pub fn get(
        &self,
        id: ConnectionId,
    ) -> Option<impl std::ops::Deref<Target = ConnectionState> + '_> {
        let handle = self.id_to_handle.get(&id)?;
        self.connections.get(*handle)
    }

    pub fn record_traffic(&self, id: ConnectionId, rx: u64, tx: u64) {
        if let Some(handle) = self.id_to_handle.get(&id) {
            if let Some(mut state) = self.connections.get_mut(*handle) {
                if rx > 0 {
                    state.record_rx(rx);
                }
                if tx > 0 {
                    state.record_tx(tx);
                }
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn is_full(&self) -> bool {
        self.connections.is_full()
    }

    /// Mark every connection draining and wait for the registry to empty,
    /// bounded by `timeout`. Stragglers are logged, not force-closed here —
    /// the caller (the acceptor) owns forcibly closing remaining sockets.
    pub async fn drain(&self, timeout: Duration) {
        info!(
            connections = self.connection_count(),
            "starting connection drain"
        );

        for entry in self.id_to_handle.iter() {
            if let Some(mut state) = self.connections.get_mut(*entry.value()) {
                state.set_draining();
            }
        }

        let start = std::time::Instant::now();
        while self.connection_count() > 0 && start.elapsed() < timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.connection_count();
        if remaining > 0 {
            warn!(remaining, "connections still open after drain timeout");
        } else {
            info!("all connections drained");
        }
    }
}
