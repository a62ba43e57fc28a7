//! SOCKS5 proxy server
//!
//! This library provides the core components for a SOCKS5 (RFC 1928)
//! proxy server: wire codec, connection handler, TCP tunnel, UDP relay,
//! DNS cache, and friendly-name resolver.

pub mod codec;
pub mod config;
pub mod connection;
pub mod dns;
pub mod error;
pub mod friendly_name;
pub mod pool;
pub mod proxy;
pub mod server;
pub mod util;

pub use config::ProxyConfig;
pub use server::Server;

/// Server version for display
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

