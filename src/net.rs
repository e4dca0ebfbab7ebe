pub mod checksum;
pub mod icmp;
pub mod socket;

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unable to resolve \"{target}\": {source}")]
    Lookup {
        target: String,
        #[source]
        source: io::Error,
    },
    #[error("got no IPv4 results for lookup \"{0}\"")]
    NoIpv4(String),
}

/// Resolves `target`, either a dotted quad or a hostname, to an IPv4 address.
pub fn resolve(target: &str) -> Result<Ipv4Addr, ResolveError> {
    // Try to parse target as an address first.
    match target.parse::<IpAddr>() {
        Ok(IpAddr::V4(addr)) => return Ok(addr),
        Ok(IpAddr::V6(_)) => return Err(ResolveError::NoIpv4(target.to_string())),
        Err(_) => {}
    }

    // Not an address, assume a hostname and look it up.
    let addrs = dns_lookup::lookup_host(target).map_err(|source| ResolveError::Lookup {
        target: target.to_string(),
        source,
    })?;
    let addr = addrs
        .into_iter()
        .find_map(|addr| match addr {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
        .ok_or_else(|| ResolveError::NoIpv4(target.to_string()))?;
    debug!(host = target, %addr, "resolved");
    Ok(addr)
}

/// Reverse lookup of `addr`, falling back to its textual form.
pub fn reverse_lookup(addr: Ipv4Addr) -> String {
    dns_lookup::lookup_addr(&IpAddr::V4(addr)).unwrap_or_else(|_| addr.to_string())
}

/// Wall clock time as fractional seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
