//! Friendly-name resolver
//!
//! A read-only `IpAddr -> label` lookup built once at startup from
//! `proxy.json`'s `IPAddressMappings`. Pure log decoration: nothing in the
//! connection handler or relay paths depends on its output, so it has no
//! behavioural effect on the protocol.

use std::collections::HashMap;
use std::net::IpAddr;
use std::net::SocketAddr;

use crate::config::IpAddressMapping;

/// Immutable IP → label lookup, built once and shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct FriendlyNames {
    labels: HashMap<IpAddr, String>,
}

impl FriendlyNames {
    /// Build from the raw config entries, dropping unparseable literals and
    /// collapsing duplicates (last wins). Invalid and duplicate entries are
    /// each reported in a single batched warning rather than one line per
    /// offender.
    pub fn build(mappings: &[IpAddressMapping]) -> Self {
        let mut labels = HashMap::with_capacity(mappings.len());
        let mut invalid = Vec::new();
        let mut duplicates = Vec::new();

        for mapping in mappings {
            match mapping.ip_address.parse::<IpAddr>() {
                Ok(ip) => {
                    if labels.insert(ip, mapping.friendly_name.clone()).is_some() {
                        duplicates.push(mapping.ip_address.clone());
                    }
                }
                Err(_) => invalid.push(mapping.ip_address.clone()),
            }
        }

        if !invalid.is_empty() {
            tracing::warn!(entries = ?invalid, "dropped unparseable IP address mappings");
        }
        if !duplicates.is_empty() {
            tracing::warn!(entries = ?duplicates, "duplicate IP address mappings, last wins");
        }

        FriendlyNames { labels }
    }

    /// `" (Label)"` if `ip` has a configured label, else `""`.
    pub fn suffix_for(&self, ip: IpAddr) -> String {
        match self.labels.get(&ip) {
            Some(label) => format!(" ({label})"),
            None => String::new(),
        }
    }

    /// Convenience for a full socket endpoint: looks up the address part.
    pub fn suffix_for_endpoint(&self, addr: SocketAddr) -> String {
        self.suffix_for(addr.ip())
    }

    /// Convenience for a textual address: parses first, returns "" if it
    /// doesn't parse as an IP (e.g. a domain name, which is never decorated).
    pub fn suffix_for_text(&self, addr: &str) -> String {
        match addr.parse::<IpAddr>() {
            Ok(ip) => self.suffix_for(ip),
            Err(_) => String::new(),
        }
    }
}
