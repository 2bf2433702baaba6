use std::net::{IpAddr, Ipv6Addr, SocketAddr, ToSocketAddrs};

use crate::error::{Result, SwiftError};

/// Environment override for the member address, for deterministic runs.
pub const MEMBER_IP_ENV: &str = "SWIFT_MEMBER_IP";

/// Pick the address this member registers under.
///
/// Honors [`MEMBER_IP_ENV`] first, then enumerates the host's addresses and
/// applies [`pick_address`].
pub fn local_member_ip() -> Result<IpAddr> {
    if let Ok(raw) = std::env::var(MEMBER_IP_ENV) {
        return raw
            .parse()
            .map_err(|_| SwiftError::KvUnavailable(format!("invalid {MEMBER_IP_ENV}: {raw}")));
    }

    let host = hostname::get()?.to_string_lossy().into_owned();
    let candidates: Vec<IpAddr> = (host.as_str(), 0u16)
        .to_socket_addrs()
        .map(|addrs| addrs.map(|a: SocketAddr| a.ip()).collect())
        .unwrap_or_default();

    pick_address(&candidates).ok_or(SwiftError::NoLocalAddress)
}

/// Choose the first usable address from a candidate list.
///
/// Rejects IPv6 link-local, multicast, site-local and Teredo addresses as
/// well as IPv4 link-local (`169.*`); prefers a non-loopback entry.
pub fn pick_address(candidates: &[IpAddr]) -> Option<IpAddr> {
    let usable: Vec<IpAddr> = candidates
        .iter()
        .copied()
        .filter(|ip| match ip {
            IpAddr::V4(v4) => !v4.octets().starts_with(&[169]),
            IpAddr::V6(v6) => {
                !is_unicast_link_local(v6)
                    && !v6.is_multicast()
                    && !is_site_local(v6)
                    && !is_teredo(v6)
            }
        })
        .collect();

    usable
        .iter()
        .find(|ip| !ip.is_loopback())
        .or_else(|| usable.first())
        .copied()
}

fn is_unicast_link_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xffc0 == 0xfe80
}

fn is_site_local(ip: &Ipv6Addr) -> bool {
    ip.segments()[0] & 0xffc0 == 0xfec0
}

fn is_teredo(ip: &Ipv6Addr) -> bool {
    let s = ip.segments();
    s[0] == 0x2001 && s[1] == 0
}
