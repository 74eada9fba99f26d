//! Endpoint name resolution.

use std::net::IpAddr;

use tracing::debug;
use vpnmgr_common::{VpnError, VpnResult};

/// Requested address family for resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrFamily {
    #[default]
    Any,
    V4,
    V6,
}

impl AddrFamily {
    fn matches(&self, addr: &IpAddr) -> bool {
        match self {
            AddrFamily::Any => true,
            AddrFamily::V4 => addr.is_ipv4(),
            AddrFamily::V6 => addr.is_ipv6(),
        }
    }
}

/// Resolves a literal IP or FQDN to the first address of the requested
/// family. Literal addresses short-circuit without a DNS query.
pub async fn resolve(endpoint: &str, family: AddrFamily) -> VpnResult<IpAddr> {
    if let Ok(addr) = endpoint.parse::<IpAddr>() {
        if family.matches(&addr) {
            return Ok(addr);
        }
        return Err(VpnError::resolve(
            endpoint,
            "literal address has wrong family",
        ));
    }

    // lookup_host needs a port; it is discarded from the result.
    let addrs = tokio::net::lookup_host((endpoint, 0))
        .await
        .map_err(|e| VpnError::resolve(endpoint, e.to_string()))?;

    for sockaddr in addrs {
        let addr = sockaddr.ip();
        if family.matches(&addr) {
            debug!(endpoint = %endpoint, addr = %addr, "Resolved endpoint");
            return Ok(addr);
        }
    }

    Err(VpnError::resolve(
        endpoint,
        "no address of requested family",
    ))
}
