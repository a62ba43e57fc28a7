//! Per-connection SOCKS5 state machine
//!
//! Modeled on the teacher's `server::acceptor::ConnectionHandler` /
//! `StreamHandler` split — a struct holding shared dependencies with a
//! `handle` entry point instrumented with the connection id as a span
//! field — but carrying the actual SOCKS5 handshake/request/dispatch flow
//! folded in from the client binary's `proxy::socks5` module instead of the
//! teacher's private stream-framing protocol.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::codec::{self, Address, Command};
use crate::connection::{ConnectionId, ConnectionManager, ConnectionPhase};
use crate::dns;
use crate::error::{ProxyError, ReplyCode};
use crate::friendly_name::FriendlyNames;
use crate::pool::BufferPool;
use crate::proxy;
use crate::util;

/// Write a control-plane reply (method selection, request reply) under the
/// same idle timeout the matching reads use. A client that stops draining
/// its receive window after the handshake read completes would otherwise
/// block this write — and the connection-registry slot it holds — forever,
/// since the tunnelled-data path's "no timeout" rule doesn't apply yet.
async fn write_control_reply(stream: &mut TcpStream, bytes: &[u8]) -> std::io::Result<()> {
    match tokio::time::timeout(util::CONTROL_PLANE_IDLE_TIMEOUT, stream.write_all(bytes)).await {
        Ok(result) => result,
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "control-plane write timed out",
        )),
    }
}

pub struct ConnectionHandler {
    conn_manager: Arc<ConnectionManager>,
    buffer_pool: BufferPool,
    friendly_names: Arc<FriendlyNames>,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(
        conn_manager: Arc<ConnectionManager>,
        buffer_pool: BufferPool,
        friendly_names: Arc<FriendlyNames>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            conn_manager,
            buffer_pool,
            friendly_names,
            shutdown,
        }
    }

    #[instrument(skip(self, stream), fields(conn_id, %peer))]
    pub async fn handle(self, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = util::configure_accepted_stream(&stream) {
            debug!(error = %e, "failed to tune accepted socket");
        }

        let conn_id = match self.conn_manager.register(peer) {
            Some(id) => id,
            None => {
                warn!("connection rejected: registry at capacity");
                return;
            }
        };
        tracing::Span::current().record("conn_id", tracing::field::display(conn_id));

        if let Err(e) = self.run(conn_id, stream, peer).await {
            debug!(error = %e, "connection closed with error");
        }

        self.conn_manager.unregister(conn_id);
    }

    async fn run(
        &self,
        conn_id: ConnectionId,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), ProxyError> {
        self.conn_manager.set_phase(conn_id, ConnectionPhase::Handshake);

        let methods = match tokio::time::timeout(
            util::CONTROL_PLANE_IDLE_TIMEOUT,
            codec::read_method_request(&mut stream),
        )
        .await
        {
            Ok(Ok(methods)) => methods,
            Ok(Err(e)) => {
                debug!(error = %e, "malformed method negotiation");
                let _ = write_control_reply(
                    &mut stream,
                    &codec::encode_method_reply(codec::METHOD_NO_ACCEPTABLE),
                )
                .await;
                return Ok(());
            }
            Err(_) => {
                let _ = write_control_reply(
                    &mut stream,
                    &codec::encode_method_reply(codec::METHOD_NO_ACCEPTABLE),
                )
                .await;
                return Ok(());
            }
        };

        let method = codec::select_method(&methods);
        write_control_reply(&mut stream, &codec::encode_method_reply(method)).await?;
        if method == codec::METHOD_NO_ACCEPTABLE {
            return Ok(());
        }

        self.conn_manager.set_phase(conn_id, ConnectionPhase::Request);

        let request = match tokio::time::timeout(
            util::CONTROL_PLANE_IDLE_TIMEOUT,
            codec::read_request(&mut stream),
        )
        .await
        {
            Ok(Ok(request)) => request,
            Ok(Err(e)) => return self.fail_request(&mut stream, ProxyError::from(e)).await,
            Err(_) => {
                return self
                    .fail_request(
                        &mut stream,
                        ProxyError::Io(std::io::Error::new(
                            std::io::ErrorKind::TimedOut,
                            "request header timed out",
                        )),
                    )
                    .await
            }
        };

        match request.command {
            Command::Connect => {
                self.handle_connect(conn_id, stream, peer, request.address)
                    .await
            }
            Command::UdpAssociate => self.handle_udp_associate(conn_id, stream, peer).await,
            Command::Bind | Command::Unknown(_) => {
                self.fail_request(&mut stream, ProxyError::CommandNotSupported)
                    .await
            }
        }
    }

    async fn fail_request(
        &self,
        stream: &mut TcpStream,
        err: ProxyError,
    ) -> Result<(), ProxyError> {
        let reply = codec::encode_reply(err.reply_code(), codec::unspecified_bind_addr());
        write_control_reply(stream, &reply).await?;
        Ok(())
    }

    async fn handle_connect(
        &self,
        conn_id: ConnectionId,
        mut stream: TcpStream,
        peer: SocketAddr,
        address: Address,
    ) -> Result<(), ProxyError> {
        let destination = match &address {
            Address::Ip(addr) => Ok(*addr),
            Address::Domain(host, port) => dns::resolve(host, *port).await,
        };

        let destination = match destination {
            Ok(addr) => addr,
            Err(e) => return self.fail_request(&mut stream, ProxyError::Connect(e)).await,
        };

        let upstream = match TcpStream::connect(destination).await {
            Ok(upstream) => upstream,
            Err(e) => return self.fail_request(&mut stream, ProxyError::Connect(e)).await,
        };
        if let Err(e) = util::configure_accepted_stream(&upstream) {
            debug!(error = %e, "failed to tune upstream socket");
        }

        let bound = upstream.local_addr()?;
        write_control_reply(&mut stream, &codec::encode_reply(ReplyCode::Success, bound)).await?;

        info!(
            %peer,
            %address,
            dest_suffix = %self.friendly_names.suffix_for_text(&address.host_text()),
            %bound,
            "CONNECT established"
        );

        self.conn_manager.set_phase(conn_id, ConnectionPhase::TcpTunnel);

        let child = self.shutdown.child_token();
        let (rx, tx) = proxy::run_tunnel(stream, upstream, self.buffer_pool.clone(), child).await;
        self.conn_manager.record_traffic(conn_id, rx, tx);

        debug!(rx_bytes = rx, tx_bytes = tx, "tunnel closed");
        Ok(())
    }

    async fn handle_udp_associate(
        &self,
        conn_id: ConnectionId,
        mut stream: TcpStream,
        peer: SocketAddr,
    ) -> Result<(), ProxyError> {
        let relay_socket = match util::bind_udp_relay(peer).await {
            Ok(socket) => socket,
            Err(e) => return self.fail_request(&mut stream, ProxyError::UdpBind(e)).await,
        };

        let bound = relay_socket.local_addr()?;
        write_control_reply(&mut stream, &codec::encode_reply(ReplyCode::Success, bound)).await?;

        info!(%peer, udp_relay = %bound, "UDP ASSOCIATE established");
        self.conn_manager
            .set_phase(conn_id, ConnectionPhase::UdpWatchdog);

        let relay_socket = Arc::new(relay_socket);
        let child = self.shutdown.child_token();

        tokio::select! {
            _ = proxy::run_association(relay_socket, peer.ip(), self.buffer_pool.clone(), child.clone()) => {}
            _ = wait_for_tcp_close(&mut stream) => {
                debug!("client TCP connection closed, ending UDP association");
                child.cancel();
            }
        }

        Ok(())
    }
}

/// Blocks until the owning TCP connection closes (read returns EOF or
/// error). Used purely as a lifetime signal for the UDP association — no
/// bytes are meaningfully read on this connection once it reaches
/// UdpWatchdog, so any stray byte a client sends here is discarded and the
/// read is retried rather than treated as closure.
async fn wait_for_tcp_close(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => continue,
        }
    }
}
