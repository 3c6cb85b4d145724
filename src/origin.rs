//! Origin-address resolution: the single IPv4 address stamped into every
//! credential encoded by this daemon (§4.9).

use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};

use log::warn;

/// Resolve the daemon's origin address.
///
/// If `configured` names a dotted-quad, hostname, or local interface, it is
/// resolved directly (interfaces are checked first so a name that matches
/// both an interface and a DNS hostname prefers the interface). Otherwise
/// the host's own primary hostname is looked up; on failure the null
/// address is used and a warning logged.
pub fn resolve(configured: Option<&str>) -> Ipv4Addr {
    if let Some(name) = configured {
        if let Ok(addr) = name.parse::<Ipv4Addr>() {
            return addr;
        }
        if let Some(addr) = resolve_interface(name) {
            return addr;
        }
        if let Some(addr) = resolve_hostname(name) {
            return addr;
        }
        warn!("failed to resolve configured origin \"{}\"; falling back", name);
    }

    match hostname::get().ok().and_then(|h| h.into_string().ok()) {
        Some(hostname) => resolve_hostname(&hostname).unwrap_or_else(|| {
            warn!("failed to resolve primary hostname \"{}\"; using 0.0.0.0", hostname);
            Ipv4Addr::UNSPECIFIED
        }),
        None => {
            warn!("failed to query primary hostname; using 0.0.0.0");
            Ipv4Addr::UNSPECIFIED
        }
    }
}

fn resolve_hostname(name: &str) -> Option<Ipv4Addr> {
    (name, 0)
        .to_socket_addrs()
        .ok()?
        .find_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        })
}

fn resolve_interface(name: &str) -> Option<Ipv4Addr> {
    let mut addrs: *mut libc::ifaddrs = std::ptr::null_mut();
    if unsafe { libc::getifaddrs(&mut addrs) } != 0 {
        return None;
    }

    let mut found = None;
    let mut current = addrs;
    while !current.is_null() {
        let entry = unsafe { &*current };
        let if_name = unsafe { std::ffi::CStr::from_ptr(entry.ifa_name) }.to_string_lossy();
        if if_name == name && !entry.ifa_addr.is_null() {
            let sockaddr = entry.ifa_addr;
            let family = unsafe { (*sockaddr).sa_family } as i32;
            if family == libc::AF_INET {
                let sockaddr_in = sockaddr as *const libc::sockaddr_in;
                let raw = unsafe { (*sockaddr_in).sin_addr.s_addr };
                found = Some(Ipv4Addr::from(u32::from_be(raw)));
                break;
            }
        }
        current = entry.ifa_next;
    }

    unsafe { libc::freeifaddrs(addrs) };
    found
}
