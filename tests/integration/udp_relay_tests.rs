//! End-to-end UDP ASSOCIATE scenarios against a real loopback relay.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};

use socks5proxy::friendly_name::FriendlyNames;
use socks5proxy::Server;

async fn start_server() -> SocketAddr {
    let friendly_names = Arc::new(FriendlyNames::build(&[]));
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), friendly_names)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = server.run().await;
    });
    addr
}

fn method_request_no_auth() -> Vec<u8> {
    vec![0x05, 0x01, 0x00]
}

fn udp_associate_request() -> Vec<u8> {
    vec![0x05, 0x03, 0x00, 0x01, 0, 0, 0, 0, 0, 0]
}

fn encode_udp_wrapper(dest: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0x00, 0x00, 0x00];
    match dest {
        SocketAddr::V4(v4) => {
            buf.push(0x01);
            buf.extend_from_slice(&v4.ip().octets());
            buf.extend_from_slice(&v4.port().to_be_bytes());
        }
        SocketAddr::V6(v6) => {
            buf.push(0x04);
            buf.extend_from_slice(&v6.ip().octets());
            buf.extend_from_slice(&v6.port().to_be_bytes());
        }
    }
    buf.extend_from_slice(payload);
    buf
}

/// Establishes the TCP control channel and UDP ASSOCIATE, returning the
/// control stream (must stay open for the association to stay alive) and
/// the relay's bound UDP address.
async fn associate(server_addr: SocketAddr) -> (TcpStream, SocketAddr) {
    let mut control = TcpStream::connect(server_addr).await.unwrap();
    control.write_all(&method_request_no_auth()).await.unwrap();
    let mut reply = [0u8; 2];
    control.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    control.write_all(&udp_associate_request()).await.unwrap();
    let mut header = [0u8; 4];
    control.read_exact(&mut header).await.unwrap();
    assert_eq!(header[1], 0x00, "UDP ASSOCIATE should succeed");
    assert_eq!(header[3], 0x01, "bound address should be IPv4");
    let mut bound = [0u8; 6];
    control.read_exact(&mut bound).await.unwrap();
    let relay_port = u16::from_be_bytes([bound[4], bound[5]]);
    let relay_addr: SocketAddr = format!("127.0.0.1:{relay_port}").parse().unwrap();

    (control, relay_addr)
}

#[tokio::test]
async fn udp_associate_relays_datagram_both_ways() {
    let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = [0u8; 128];
        loop {
            let (n, from) = match remote.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(_) => break,
            };
            if remote.send_to(&buf[..n], from).await.is_err() {
                break;
            }
        }
    });

    let server_addr = start_server().await;
    let (_control, relay_addr) = associate(server_addr).await;

    let client_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let wrapped = encode_udp_wrapper(remote_addr, b"ping");
    client_udp.send_to(&wrapped, relay_addr).await.unwrap();

    let mut resp = [0u8; 128];
    let (n, from) = tokio::time::timeout(Duration::from_secs(2), client_udp.recv_from(&mut resp))
        .await
        .expect("timed out waiting for relayed response")
        .unwrap();

    assert_eq!(from, relay_addr);
    assert_eq!(resp[3], 0x01, "wrapper should carry an IPv4 source address");
    assert_eq!(&resp[10..n], b"ping");
}

#[tokio::test]
async fn fragmented_datagram_is_dropped_silently() {
    let remote = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let remote_addr = remote.local_addr().unwrap();

    let server_addr = start_server().await;
    let (_control, relay_addr) = associate(server_addr).await;

    let client_udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let mut wrapped = encode_udp_wrapper(remote_addr, b"fragment");
    wrapped[2] = 0x01; // FRAG != 0
    client_udp.send_to(&wrapped, relay_addr).await.unwrap();

    let mut buf = [0u8; 32];
    let result = tokio::time::timeout(Duration::from_millis(300), remote.recv_from(&mut buf)).await;
    assert!(result.is_err(), "fragmented datagrams must not be forwarded");
}
