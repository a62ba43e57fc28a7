//! End-to-end TCP CONNECT scenarios against a real loopback listener.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

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

fn method_request_gssapi_only() -> Vec<u8> {
    vec![0x05, 0x01, 0x01]
}

fn connect_request(target: SocketAddr) -> Vec<u8> {
    let mut buf = vec![0x05, 0x01, 0x00];
    match target {
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
    buf
}

fn domain_connect_request(host: &str, port: u16) -> Vec<u8> {
    let mut buf = vec![0x05, 0x01, 0x00, 0x03, host.len() as u8];
    buf.extend_from_slice(host.as_bytes());
    buf.extend_from_slice(&port.to_be_bytes());
    buf
}

#[tokio::test]
async fn no_auth_handshake_selects_no_auth() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&method_request_no_auth()).await.unwrap();

    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);
}

#[tokio::test]
async fn gssapi_only_is_rejected_and_connection_closed() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(&method_request_gssapi_only())
        .await
        .unwrap();

    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0xFF]);

    let mut buf = [0u8; 1];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "server should close the connection after no-acceptable-methods");
}

#[tokio::test]
async fn connect_to_literal_ip_relays_bytes_both_ways() {
    let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let echo_addr = echo.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = echo.accept().await.unwrap();
        let mut buf = [0u8; 64];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });

    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&method_request_no_auth()).await.unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply, [0x05, 0x00]);

    client.write_all(&connect_request(echo_addr)).await.unwrap();

    let mut header = [0u8; 4];
    client.read_exact(&mut header).await.unwrap();
    assert_eq!(header[1], 0x00, "CONNECT should succeed");
    assert_eq!(header[3], 0x01, "bound address should be IPv4");
    let mut bound = [0u8; 6];
    client.read_exact(&mut bound).await.unwrap();

    client.write_all(b"hello").await.unwrap();
    let mut echoed = [0u8; 5];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"hello");
}

#[tokio::test]
async fn domain_connect_refused_maps_to_connection_refused_reply() {
    let probe = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = probe.local_addr().unwrap();
    drop(probe);

    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&method_request_no_auth()).await.unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();

    client
        .write_all(&domain_connect_request("localhost", dead_addr.port()))
        .await
        .unwrap();

    let mut header = [0u8; 4];
    client.read_exact(&mut header).await.unwrap();
    assert_eq!(header[1], 0x05, "expected ConnectionRefused REP code");
}

#[tokio::test]
async fn unsupported_command_is_rejected() {
    let addr = start_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(&method_request_no_auth()).await.unwrap();
    let mut reply = [0u8; 2];
    client.read_exact(&mut reply).await.unwrap();

    // BIND (0x02) is not supported by this proxy.
    let mut req = vec![0x05, 0x02, 0x00, 0x01];
    req.extend_from_slice(&[127, 0, 0, 1]);
    req.extend_from_slice(&1080u16.to_be_bytes());
    client.write_all(&req).await.unwrap();

    let mut header = [0u8; 4];
    client.read_exact(&mut header).await.unwrap();
    assert_eq!(header[1], 0x07, "expected CommandNotSupported REP code");
}
