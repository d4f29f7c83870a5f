//! Network candidate selection
//!
//! The host-OS side of interface selection (enumerating adapters, producing
//! connected sockets) lives outside this crate; what belongs here is the
//! preference rule: when the target host is link-local (169.254.0.0/16),
//! only link-local candidates may be used — routing a link-local peer
//! through a routed interface silently black-holes. For any other host the
//! first candidate wins.

use crate::error::{Error, Result};
use std::net::{IpAddr, SocketAddr};

/// Link-local /16 prefix used by the glasses
const LINK_LOCAL_PREFIX: &str = "169.254.";

/// True when the host string targets the link-local range
pub fn is_link_local_host(host: &str) -> bool {
    host.starts_with(LINK_LOCAL_PREFIX)
}

fn is_link_local_addr(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(_) => false,
    }
}

/// Pick the remote address to connect to from resolver output
pub fn select_remote_candidate(host: &str, candidates: &[SocketAddr]) -> Result<SocketAddr> {
    let selected = if is_link_local_host(host) {
        candidates
            .iter()
            .find(|c| is_link_local_addr(&c.ip()))
            .copied()
    } else {
        candidates.first().copied()
    };
    selected.ok_or_else(|| {
        Error::NetworkUnavailable(format!(
            "no usable address candidate for {} (of {})",
            host,
            candidates.len()
        ))
    })
}

/// Apply the interface preference to local address candidates.
///
/// Callers that bind an explicit interface feed their adapter addresses
/// through this before connecting.
pub fn select_local_candidate(host: &str, candidates: &[IpAddr]) -> Result<IpAddr> {
    let selected = if is_link_local_host(host) {
        candidates.iter().find(|c| is_link_local_addr(c)).copied()
    } else {
        candidates.first().copied()
    };
    selected.ok_or_else(|| {
        Error::NetworkUnavailable(format!(
            "no interface candidate matches {} (have {})",
            host,
            candidates.len()
        ))
    })
}
