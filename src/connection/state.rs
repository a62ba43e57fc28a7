//! Connection state

use std::net::SocketAddr;
use std::time::Instant;

/// Unique connection identifier, also carried as a `tracing` span field so
/// every log line for a connection's lifetime shares one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Connection lifecycle phase, per the state machine: Handshake -> Request
/// -> (TcpTunnel | UdpWatchdog) -> Closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Handshake,
    Request,
    TcpTunnel,
    UdpWatchdog,
    Draining,
    Closed,
}

/// Per-connection state tracked in the registry.
#[derive(Debug)]
pub struct ConnectionState {
    pub id: ConnectionId,
    pub client_addr: SocketAddr,
    pub phase: ConnectionPhase,
    pub connected_at: Instant,
    pub last_active: Instant,
    pub bytes_rx: u64,
    pub bytes_tx: u64,
}

impl ConnectionState {
    pub fn new(id: ConnectionId, client_addr: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id,
            client_addr,
            phase: ConnectionPhase::Handshake,
            connected_at: now,
            last_active: now,
            bytes_rx: 0,
            bytes_tx: 0,
        }
    }

    pub fn set_phase(&mut self, phase: ConnectionPhase) {
        self.phase = phase;
        self.touch();
    }

    pub fn set_draining(&mut self) {
        self.phase = ConnectionPhase::Draining;
    }

    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    pub fn record_rx(&mut self, bytes: u64) {
        self.bytes_rx = self.bytes_rx.saturating_add(bytes);
        self.touch();
    }

    pub fn record_tx(&mut self, bytes: u64) {
        self.bytes_tx = self.bytes_tx.saturating_add(bytes);
        self.touch();
    }

    pub fn duration(&self) -> std::time::Duration {
        self.connected_at.elapsed()
    }

    pub fn idle_duration(&self) -> std::time::Duration {
        self.last_active.elapsed()
    }
}
