//! UDP relay
//!
//! Owns one UDP socket per UDP ASSOCIATE, relaying datagrams between the
//! client and arbitrary remote peers. Grounded in the teacher's
//! `UdpSocketPool` for the dashmap-plus-TTL *style* of socket bookkeeping,
//! but the shape is inverted here: the teacher multiplexes many short-lived
//! request/response exchanges over pooled outbound sockets, while this
//! relay owns a single long-lived socket per association and classifies
//! every datagram's source against a learned client endpoint (the client's
//! UDP source port is rarely its TCP source port, so the client is
//! authenticated by IP first and then pinned to whichever endpoint first
//! sends from that IP).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::codec::{self, Address};
use crate::dns;
use crate::pool::{BufferPool, BufferSize};

/// Runs the receive loop for one UDP ASSOCIATE until `cancel` fires or the
/// socket errors. `client_tcp_ip` is the authorization key: datagrams
/// arriving from that IP, before any client datagram has been observed,
/// adopt their source as the learned client endpoint.
pub async fn run_association(
    socket: Arc<UdpSocket>,
    client_tcp_ip: IpAddr,
    buffer_pool: BufferPool,
    cancel: CancellationToken,
) {
    let learned_endpoint: std::sync::Mutex<Option<SocketAddr>> = std::sync::Mutex::new(None);

    loop {
        let mut buf = buffer_pool.acquire_or_alloc(BufferSize::Large);

        let (n, source) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(v) => v,
                Err(e) => {
                    debug!(error = %e, "UDP relay receive error");
                    break;
                }
            },
        };

        let is_client_source = {
            let mut learned = learned_endpoint.lock().unwrap();
            match *learned {
                Some(endpoint) => source == endpoint,
                None if source.ip() == client_tcp_ip => {
                    *learned = Some(source);
                    true
                }
                None => false,
            }
        };

        if is_client_source {
            handle_client_datagram(&socket, &buf[..n], &cancel).await;
        } else {
            let endpoint = *learned_endpoint.lock().unwrap();
            handle_remote_datagram(&socket, source, &buf[..n], endpoint).await;
        }
    }
}

/// Client -> remote: decode the wrapper, reject fragments, resolve the
/// destination (direct for IP literals, DNS-cache-backed for domains), and
/// forward the payload unmodified. Resolution races the association's
/// cancellation token so a shutdown mid-lookup drops the datagram instead of
/// blocking the receive loop's teardown.
async fn handle_client_datagram(socket: &UdpSocket, datagram: &[u8], cancel: &CancellationToken) {
    let (header, offset) = match codec::decode_udp_header(datagram) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping malformed UDP relay datagram");
            return;
        }
    };

    if header.fragment != 0 {
        warn!(fragment = header.fragment, "dropping fragmented UDP datagram");
        return;
    }

    let destination = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        result = resolve_destination(&header.address) => match result {
            Ok(addr) => addr,
            Err(e) => {
                warn!(error = %e, address = %header.address, "DNS resolution failed for UDP destination");
                return;
            }
        },
    };

    let payload = &datagram[offset..];
    if let Err(e) = socket.send_to(payload, destination).await {
        debug!(error = %e, %destination, "failed to forward UDP payload to remote");
    }
}

/// Remote -> client: wrap the payload with the source endpoint and send it
/// to the learned client endpoint. Per the documented policy, datagrams
/// that arrive before a client endpoint has been learned are held (dropped)
/// rather than risked against an unconfirmed TCP-endpoint-as-UDP target.
async fn handle_remote_datagram(
    socket: &UdpSocket,
    source: SocketAddr,
    payload: &[u8],
    learned_endpoint: Option<SocketAddr>,
) {
    let Some(client_endpoint) = learned_endpoint else {
        debug!(%source, "dropping early remote datagram: no learned client UDP endpoint yet");
        return;
    };

    let wrapped = codec::encode_udp_datagram(source, payload);
    if let Err(e) = socket.send_to(&wrapped, client_endpoint).await {
        debug!(error = %e, %client_endpoint, "failed to deliver UDP datagram to client");
    }
}

async fn resolve_destination(address: &Address) -> std::io::Result<SocketAddr> {
    match address {
        Address::Ip(addr) => Ok(*addr),
        Address::Domain(host, port) => dns::resolve(host, *port).await,
    }
}
