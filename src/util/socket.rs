//! Socket creation and tuning
//!
//! The listening socket is built through `socket2` so address reuse can be
//! set before bind/listen, then handed to `tokio` as a standard listener.
//! Accepted sockets get Nagle disabled and a keepalive applied, per the
//! "control-plane socket options on accept" requirement; the tunnelled data
//! path itself is never touched after that.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

/// Idle timeout applied to control-plane reads (handshake, request parsing).
/// The tunnelled data path has no read timeout.
pub const CONTROL_PLANE_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Bind a TCP listener on `addr` with `SO_REUSEADDR` set before bind.
pub fn bind_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
    let socket = Socket::new(domain, Type::STREAM, None)?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    TcpListener::from_std(socket.into())
}

/// Disable Nagle and enable a keepalive on a freshly accepted connection.
pub fn configure_accepted_stream(stream: &TcpStream) -> std::io::Result<()> {
    stream.set_nodelay(true)?;

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    socket2::SockRef::from(stream).set_tcp_keepalive(&keepalive)?;

    Ok(())
}

/// Bind an ephemeral UDP relay socket on the same address family as `family_hint`.
pub async fn bind_udp_relay(family_hint: SocketAddr) -> std::io::Result<tokio::net::UdpSocket> {
    let any: SocketAddr = if family_hint.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    tokio::net::UdpSocket::bind(any).await
}
