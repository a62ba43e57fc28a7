//! Error types and REP-code mapping
//!
//! Two error types cover the connection lifetime: [`CodecError`] for
//! malformed wire data, and [`ProxyError`] for everything else a connection
//! handler can fail on. Both carry enough information to compute the
//! SOCKS5 reply code a failure should be reported as (§7 of the spec).

use std::io;

/// A reply code as defined by RFC 1928 (`REP` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Success = 0x00,
    GeneralFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl ReplyCode {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Failure to decode a SOCKS5 wire structure (method negotiation, request,
/// reply, or UDP datagram header).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unsupported SOCKS version {0:#x}")]
    UnsupportedVersion(u8),

    #[error("NMETHODS was zero")]
    NoMethodsOffered,

    #[error("unsupported address type {0:#x}")]
    UnsupportedAtyp(u8),

    #[error("domain name is not valid UTF-8/ASCII")]
    InvalidDomain,

    #[error("UDP datagram too short ({0} bytes)")]
    DatagramTooShort(usize),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure during request dispatch (connect, bind, associate) after the
/// request itself decoded successfully.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    Malformed(#[from] CodecError),

    #[error("command not supported")]
    CommandNotSupported,

    #[error("no acceptable authentication method offered")]
    NoAcceptableMethod,

    #[error("upstream connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("failed to bind UDP relay socket: {0}")]
    UdpBind(#[source] io::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProxyError {
    /// Map this error to the REP code that should be written to the client,
    /// per the taxonomy in spec §7. Unknown/unanticipated OS errors always
    /// fall back to `GeneralFailure` rather than leaking OS-specific detail.
    pub fn reply_code(&self) -> ReplyCode {
        match self {
            ProxyError::Malformed(CodecError::UnsupportedAtyp(_)) => {
                ReplyCode::AddressTypeNotSupported
            }
            ProxyError::Malformed(_) => ReplyCode::GeneralFailure,
            ProxyError::CommandNotSupported => ReplyCode::CommandNotSupported,
            ProxyError::NoAcceptableMethod => ReplyCode::GeneralFailure,
            ProxyError::Connect(e) => io_error_to_reply(e),
            ProxyError::UdpBind(_) => ReplyCode::GeneralFailure,
            ProxyError::Io(e) => io_error_to_reply(e),
        }
    }
}

/// Map a connect-time `io::Error` to the REP code table in spec §7.
///
/// `ErrorKind` alone cannot distinguish "host unreachable" from "network
/// unreachable" on a stable-since-1.75 compiler, so those two cases are
/// recovered from the platform's raw errno (`EHOSTUNREACH`/`ENETUNREACH`
/// on Linux) and otherwise fall back to `GeneralFailure`, matching the
/// "unknown socket errors fall back to GeneralFailure" contract in §9.
pub fn io_error_to_reply(err: &io::Error) -> ReplyCode {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => return ReplyCode::ConnectionRefused,
        io::ErrorKind::TimedOut => return ReplyCode::TtlExpired,
        io::ErrorKind::AddrNotAvailable => return ReplyCode::HostUnreachable,
        _ => {}
    }

    #[cfg(target_os = "linux")]
    {
        match err.raw_os_error() {
            Some(libc::EHOSTUNREACH) => return ReplyCode::HostUnreachable,
            Some(libc::ENETUNREACH) => return ReplyCode::NetworkUnreachable,
            _ => {}
        }
    }

    ReplyCode::GeneralFailure
}
