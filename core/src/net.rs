//! Local network addresses, for telling clients where to connect

use std::net::{IpAddr, SocketAddr};

/// Get local IP addresses (non-loopback)
pub fn get_local_ips() -> Vec<IpAddr> {
    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter(|iface| !iface.is_loopback())
            .map(|iface| iface.ip())
            .collect(),
        Err(e) => {
            tracing::debug!("cannot list network interfaces: {}", e);
            Vec::new()
        }
    }
}

/// Addresses a client can use to reach a server bound to `bound`.
///
/// A wildcard bind is expanded to every non-loopback interface address of
/// the same family; a specific bind is returned as is.
pub fn connect_addresses(bound: SocketAddr) -> Vec<SocketAddr> {
    expand(bound, get_local_ips())
}

fn expand(bound: SocketAddr, local_ips: Vec<IpAddr>) -> Vec<SocketAddr> {
    if !bound.ip().is_unspecified() {
        return vec![bound];
    }

    local_ips
        .into_iter()
        .filter(|ip| ip.is_ipv4() == bound.is_ipv4())
        .map(|ip| SocketAddr::new(ip, bound.port()))
        .collect()
}
