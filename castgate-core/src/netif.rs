use std::net::Ipv4Addr;

/// Resolve the configured multicast interface to its IPv4 address.
///
/// Accepts either an interface name (`eth0`) or a literal IPv4 address.
/// Returns `None` when no such interface exists or it carries no IPv4
/// address; the caller treats that as "multicast unavailable" rather
/// than a startup failure.
pub fn multicast_interface_addr(name: &str) -> Option<Ipv4Addr> {
    if let Ok(addr) = name.parse::<Ipv4Addr>() {
        return Some(addr);
    }

    let interfaces = match if_addrs::get_if_addrs() {
        Ok(list) => list,
        Err(e) => {
            tracing::warn!("failed to enumerate interfaces: {e}");
            return None;
        }
    };

    interfaces.into_iter().find_map(|iface| {
        if iface.name != name {
            return None;
        }
        match iface.addr {
            if_addrs::IfAddr::V4(v4) => Some(v4.ip),
            if_addrs::IfAddr::V6(_) => None,
        }
    })
}
