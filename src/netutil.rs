use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// First non-loopback private IPv4 of this host, discovered by asking the
/// routing table which source address an outbound datagram would use.
/// No packet is sent. `None` when the host has no private route.
pub fn local_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("10.254.254.254:1").ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if !addr.ip().is_loopback() && addr.ip().is_private() => {
            Some(*addr.ip())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovered_address_is_private_if_any() {
        if let Some(ip) = local_ipv4() {
            assert!(ip.is_private());
            assert!(!ip.is_loopback());
        }
    }
}
