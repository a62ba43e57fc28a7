//! SOCKS5 wire protocol codec
//!
//! Pure encode/decode for method negotiation, the CONNECT/UDP_ASSOCIATE
//! request, the reply, and the UDP relay datagram header (RFC 1928, and
//! the SOCKS5 UDP framing described in its §7). Decoders are total
//! functions over an async byte source: malformed input yields a
//! [`CodecError`], never a panic, and every read loops to tolerate short
//! reads (spec §4.1).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{CodecError, ReplyCode};

pub const VERSION: u8 = 0x05;

pub const METHOD_NO_AUTH: u8 = 0x00;
pub const METHOD_NO_ACCEPTABLE: u8 = 0xFF;

pub const ATYP_IPV4: u8 = 0x01;
pub const ATYP_DOMAIN: u8 = 0x03;
pub const ATYP_IPV6: u8 = 0x04;

/// A SOCKS5 request command (`CMD` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(v: u8) -> Self {
        match v {
            0x01 => Command::Connect,
            0x02 => Command::Bind,
            0x03 => Command::UdpAssociate,
            other => Command::Unknown(other),
        }
    }
}

/// A destination address as carried on the wire: either a literal IP or a
/// domain name plus port. Domains are resolved downstream (the codec
/// itself never performs DNS).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl Address {
    pub fn port(&self) -> u16 {
        match self {
            Address::Ip(addr) => addr.port(),
            Address::Domain(_, port) => *port,
        }
    }

    /// The host portion alone, with no port — what a friendly-name lookup
    /// keys on, as opposed to `Display`'s `host:port` wire-style rendering.
    pub fn host_text(&self) -> String {
        match self {
            Address::Ip(addr) => addr.ip().to_string(),
            Address::Domain(host, _) => host.clone(),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Ip(addr) => write!(f, "{addr}"),
            Address::Domain(host, port) => write!(f, "{host}:{port}"),
        }
    }
}

/// A decoded client request (`VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT`).
#[derive(Debug, Clone)]
pub struct Request {
    pub command: Command,
    pub address: Address,
}

/// Read the client's method negotiation message and return the offered
/// method bytes. `VER=5 | NMETHODS | METHODS[NMETHODS]`.
pub async fn read_method_request<R>(reader: &mut R) -> Result<Vec<u8>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let version = header[0];
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let nmethods = header[1] as usize;
    if nmethods == 0 {
        return Err(CodecError::NoMethodsOffered);
    }

    let mut methods = vec![0u8; nmethods];
    reader.read_exact(&mut methods).await?;
    Ok(methods)
}

/// Encode the server's method selection reply: `VER=5 | METHOD`.
pub fn encode_method_reply(method: u8) -> [u8; 2] {
    [VERSION, method]
}

/// Choose a method from those offered: no-auth if present, else "no
/// acceptable methods".
pub fn select_method(offered: &[u8]) -> u8 {
    if offered.contains(&METHOD_NO_AUTH) {
        METHOD_NO_AUTH
    } else {
        METHOD_NO_ACCEPTABLE
    }
}

/// Read a full request: `VER | CMD | RSV | ATYP | DST.ADDR | DST.PORT`.
/// Loops internally so partial TCP reads never surface as truncation.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;

    let version = header[0];
    if version != VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }
    let command = Command::from(header[1]);
    // header[2] is RSV, ignored.
    let atyp = header[3];

    let address = read_address(reader, atyp).await?;

    Ok(Request { command, address })
}

/// Read an `ATYP | ADDR | PORT` triple, given an already-consumed ATYP byte.
/// Shared by request decoding, reply decoding, and the UDP header.
async fn read_address<R>(reader: &mut R, atyp: u8) -> Result<Address, CodecError>
where
    R: AsyncRead + Unpin,
{
    let address = match atyp {
        ATYP_IPV4 => {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf).await?;
            IpAddr::V4(Ipv4Addr::from(buf))
        }
        ATYP_IPV6 => {
            let mut buf = [0u8; 16];
            reader.read_exact(&mut buf).await?;
            IpAddr::V6(Ipv6Addr::from(buf))
        }
        ATYP_DOMAIN => {
            let mut len_buf = [0u8; 1];
            reader.read_exact(&mut len_buf).await?;
            let len = len_buf[0] as usize;
            let mut domain = vec![0u8; len];
            reader.read_exact(&mut domain).await?;
            let domain = String::from_utf8(domain).map_err(|_| CodecError::InvalidDomain)?;
            let mut port_buf = [0u8; 2];
            reader.read_exact(&mut port_buf).await?;
            let port = u16::from_be_bytes(port_buf);
            return Ok(Address::Domain(domain, port));
        }
        other => return Err(CodecError::UnsupportedAtyp(other)),
    };

    let mut port_buf = [0u8; 2];
    reader.read_exact(&mut port_buf).await?;
    let port = u16::from_be_bytes(port_buf);
    Ok(Address::Ip(SocketAddr::new(address, port)))
}

/// Encode a reply: `VER | REP | RSV=0 | ATYP | BND.ADDR | BND.PORT`.
pub fn encode_reply(rep: ReplyCode, bound: SocketAddr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(22);
    buf.push(VERSION);
    buf.push(rep.as_u8());
    buf.push(0x00);
    encode_address_into(&mut buf, bound);
    buf
}

/// A reply with no real bound endpoint (failure case): ATYP=IPv4, 0.0.0.0:0.
pub fn unspecified_bind_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
}

fn encode_address_into(buf: &mut Vec<u8>, addr: SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&v4.ip().octets());
            buf.extend_from_slice(&v4.port().to_be_bytes());
        }
        SocketAddr::V6(v6) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&v6.ip().octets());
            buf.extend_from_slice(&v6.port().to_be_bytes());
        }
    }
}

/// A decoded UDP relay datagram header:
/// `RSV(2)=0 | FRAG(1) | ATYP | DST.ADDR | DST.PORT`.
#[derive(Debug, Clone)]
pub struct UdpHeader {
    pub fragment: u8,
    pub address: Address,
}

/// Decode a UDP wrapper header from a full datagram buffer. Returns the
/// header plus the byte offset where the payload begins. Rejects buffers
/// shorter than the minimum 10-byte IPv4 header; does not itself reject
/// `fragment != 0` (callers decide whether to drop, per §8's "no reply is
/// generated" requirement living at the call site, not the codec).
pub fn decode_udp_header(buf: &[u8]) -> Result<(UdpHeader, usize), CodecError> {
    if buf.len() < 10 {
        return Err(CodecError::DatagramTooShort(buf.len()));
    }

    let fragment = buf[2];
    let atyp = buf[3];

    let (address, consumed) = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            octets.copy_from_slice(&buf[4..8]);
            let port = u16::from_be_bytes([buf[8], buf[9]]);
            (
                Address::Ip(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(octets)), port)),
                10,
            )
        }
        ATYP_IPV6 => {
            if buf.len() < 22 {
                return Err(CodecError::DatagramTooShort(buf.len()));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&buf[4..20]);
            let port = u16::from_be_bytes([buf[20], buf[21]]);
            (
                Address::Ip(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(octets)), port)),
                22,
            )
        }
        ATYP_DOMAIN => {
            let len = buf[4] as usize;
            let port_end = 5 + len + 2;
            if buf.len() < port_end {
                return Err(CodecError::DatagramTooShort(buf.len()));
            }
            let domain = std::str::from_utf8(&buf[5..5 + len])
                .map_err(|_| CodecError::InvalidDomain)?
                .to_string();
            let port = u16::from_be_bytes([buf[5 + len], buf[6 + len]]);
            (Address::Domain(domain, port), port_end)
        }
        other => return Err(CodecError::UnsupportedAtyp(other)),
    };

    Ok((UdpHeader { fragment, address }, consumed))
}

/// Encode a UDP wrapper header followed by `payload`: `RSV(2)=0 | FRAG=0 |
/// ATYP | ADDR | PORT | DATA`.
pub fn encode_udp_datagram(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(10 + payload.len());
    buf.extend_from_slice(&[0x00, 0x00, 0x00]); // RSV, FRAG=0
    encode_address_into(&mut buf, addr);
    buf.extend_from_slice(payload);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn method_request_no_auth_offered() {
        let mut cursor = Cursor::new(vec![0x05, 0x02, 0x00, 0x01]);
        let methods = read_method_request(&mut cursor).await.unwrap();
        assert_eq!(select_method(&methods), METHOD_NO_AUTH);
    }

    #[tokio::test]
    async fn method_request_only_gssapi() {
        let mut cursor = Cursor::new(vec![0x05, 0x01, 0x01]);
        let methods = read_method_request(&mut cursor).await.unwrap();
        assert_eq!(select_method(&methods), METHOD_NO_ACCEPTABLE);
    }

    #[tokio::test]
    async fn method_request_rejects_bad_version() {
        let mut cursor = Cursor::new(vec![0x04, 0x01, 0x00]);
        let err = read_method_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion(0x04)));
    }

    #[tokio::test]
    async fn method_request_rejects_zero_methods() {
        let mut cursor = Cursor::new(vec![0x05, 0x00]);
        let err = read_method_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CodecError::NoMethodsOffered));
    }

    #[tokio::test]
    async fn request_roundtrip_ipv4() {
        // CONNECT 93.184.216.34:80
        let bytes = vec![0x05, 0x01, 0x00, 0x01, 0x5D, 0xB8, 0xD8, 0x22, 0x00, 0x50];
        let mut cursor = Cursor::new(bytes);
        let req = read_request(&mut cursor).await.unwrap();
        assert_eq!(req.command, Command::Connect);
        match req.address {
            Address::Ip(addr) => {
                assert_eq!(addr, "93.184.216.34:80".parse().unwrap());
            }
            _ => panic!("expected IPv4 address"),
        }
    }

    #[tokio::test]
    async fn request_roundtrip_domain() {
        let mut bytes = vec![0x05, 0x01, 0x00, 0x03, 0x0Bu8];
        bytes.extend_from_slice(b"example.org");
        bytes.extend_from_slice(&80u16.to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        let req = read_request(&mut cursor).await.unwrap();
        match req.address {
            Address::Domain(host, port) => {
                assert_eq!(host, "example.org");
                assert_eq!(port, 80);
            }
            _ => panic!("expected domain address"),
        }
    }

    #[tokio::test]
    async fn request_roundtrip_ipv6() {
        let ip = Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1);
        let mut bytes = vec![0x05, 0x01, 0x00, 0x04];
        bytes.extend_from_slice(&ip.octets());
        bytes.extend_from_slice(&443u16.to_be_bytes());
        let mut cursor = Cursor::new(bytes);
        let req = read_request(&mut cursor).await.unwrap();
        match req.address {
            Address::Ip(addr) => assert_eq!(addr, SocketAddr::new(IpAddr::V6(ip), 443)),
            _ => panic!("expected IPv6 address"),
        }
    }

    #[tokio::test]
    async fn request_rejects_unsupported_atyp() {
        let bytes = vec![0x05, 0x01, 0x00, 0x7F];
        let mut cursor = Cursor::new(bytes);
        let err = read_request(&mut cursor).await.unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedAtyp(0x7F)));
    }

    #[test]
    fn reply_failure_uses_zero_ipv4() {
        let reply = encode_reply(ReplyCode::HostUnreachable, unspecified_bind_addr());
        assert_eq!(
            reply,
            vec![0x05, 0x04, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn udp_header_rejects_short_datagram() {
        let err = decode_udp_header(&[0u8; 9]).unwrap_err();
        assert!(matches!(err, CodecError::DatagramTooShort(9)));
    }

    #[test]
    fn udp_header_roundtrip_ipv4() {
        let addr: SocketAddr = "8.8.8.8:53".parse().unwrap();
        let encoded = encode_udp_datagram(addr, b"payload");
        let (header, offset) = decode_udp_header(&encoded).unwrap();
        assert_eq!(header.fragment, 0);
        assert_eq!(header.address, Address::Ip(addr));
        assert_eq!(&encoded[offset..], b"payload");
    }

    #[test]
    fn udp_header_preserves_nonzero_fragment_for_caller_to_reject() {
        let mut encoded = encode_udp_datagram("8.8.8.8:53".parse().unwrap(), b"x");
        encoded[2] = 0x01;
        let (header, _) = decode_udp_header(&encoded).unwrap();
        assert_eq!(header.fragment, 1);
    }
}
