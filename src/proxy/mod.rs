//! Proxy implementations
//!
//! TCP tunnel forwarding and UDP datagram relaying.

mod tcp;
mod udp;

pub use tcp::run_tunnel;
pub use udp::run_association;
