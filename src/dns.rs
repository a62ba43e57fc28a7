//! Process-wide DNS cache for the UDP relay
//!
//! Name -> address-list resolver with a bounded, TTL-expiring dashmap,
//! grounded in the teacher's `UdpSocketPool` (dashmap keyed on destination,
//! TTL-checked on lookup, stale entries reaped). Here the key is the domain
//! name rather than a destination socket, and misses resolve via
//! `tokio::net::lookup_host` instead of opening a socket.

use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use once_cell::sync::Lazy;

const TTL: Duration = Duration::from_secs(300);
const MAX_ENTRIES: usize = 1024;

struct Entry {
    addresses: Vec<IpAddr>,
    expires_at: Instant,
}

/// Global, process-wide cache. `once_cell::sync::Lazy` gives every relay
/// association a reference to the same map without threading an `Arc`
/// through the relay construction path.
static CACHE: Lazy<DashMap<String, Entry>> = Lazy::new(DashMap::new);

/// Resolve `host` to a `SocketAddr`, preferring a cached, unexpired entry.
/// On cache miss (or expiry), resolves via the system resolver, prefers the
/// first IPv4 result and falls back to the first address of any family,
/// then caches the full result set.
pub async fn resolve(host: &str, port: u16) -> std::io::Result<SocketAddr> {
    if let Some(entry) = CACHE.get(host) {
        if entry.expires_at > Instant::now() {
            if let Some(ip) = pick(&entry.addresses) {
                return Ok(SocketAddr::new(ip, port));
            }
        }
    }

    let addresses: Vec<IpAddr> = tokio::net::lookup_host((host, port))
        .await?
        .map(|addr| addr.ip())
        .collect();

    let chosen = pick(&addresses).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no addresses resolved for {host}"),
        )
    })?;

    insert(host, addresses);

    Ok(SocketAddr::new(chosen, port))
}

fn pick(addresses: &[IpAddr]) -> Option<IpAddr> {
    addresses
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addresses.first())
        .copied()
}

fn insert(host: &str, addresses: Vec<IpAddr>) {
    if CACHE.len() >= MAX_ENTRIES && !CACHE.contains_key(host) {
        evict_oldest();
    }

    CACHE.insert(
        host.to_string(),
        Entry {
            addresses,
            expires_at: Instant::now() + TTL,
        },
    );
}

/// Evict the entry with the earliest expiry. O(n) over a bounded map; this
/// runs only when the cache is at capacity, not on the hot lookup path.
fn evict_oldest() {
    let oldest = CACHE
        .iter()
        .min_by_key(|entry| entry.expires_at)
        .map(|entry| entry.key().clone());

    if let Some(key) = oldest {
        CACHE.remove(&key);
    }
}
