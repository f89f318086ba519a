use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;

use log::{debug, warn};
use network_interface::{Addr, NetworkInterface, NetworkInterfaceConfig};
use serde::Serialize;

/// Broadcast addresses worth trying when interface enumeration yields
/// nothing usable. Ordered by how common the home-network range is.
const FALLBACK_BROADCASTS: [Ipv4Addr; 6] = [
    Ipv4Addr::new(192, 168, 1, 255),
    Ipv4Addr::new(192, 168, 0, 255),
    Ipv4Addr::new(10, 0, 0, 255),
    Ipv4Addr::new(172, 16, 255, 255),
    Ipv4Addr::new(192, 168, 2, 255),
    Ipv4Addr::new(192, 168, 10, 255),
];

/// Where a candidate broadcast address came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Provenance {
    /// Derived from an active local interface.
    AutoDetected,
    /// Taken from the static list of common private-network broadcasts.
    Fallback,
}

/// One broadcast address to attempt discovery against.
///
/// Candidates are regenerated on every resolution request; nothing about
/// the local network configuration is cached between calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NetworkCandidate {
    pub addr: Ipv4Addr,
    pub provenance: Provenance,
}

impl Display for NetworkCandidate {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.provenance {
            Provenance::AutoDetected => write!(f, "{} (auto-detected)", self.addr),
            Provenance::Fallback => write!(f, "{} (fallback)", self.addr),
        }
    }
}

/// Resolves the ordered list of broadcast candidates for discovery.
///
/// Auto-detected candidates come first, the static fallbacks after them,
/// with duplicates removed. The result is never empty: even when interface
/// enumeration fails outright, the fallback list keeps discovery possible.
pub fn resolve_candidates() -> Vec<NetworkCandidate> {
    let mut candidates = auto_candidates();
    candidates.extend(FALLBACK_BROADCASTS.iter().map(|&addr| NetworkCandidate {
        addr,
        provenance: Provenance::Fallback,
    }));

    let mut seen = std::collections::HashSet::new();
    candidates.retain(|c| seen.insert(c.addr));
    candidates
}

/// Derives broadcast addresses from the active local interfaces.
///
/// Loopback, unspecified and link-local addresses are skipped. May be empty
/// on hosts where enumeration is not permitted.
pub fn auto_candidates() -> Vec<NetworkCandidate> {
    let interfaces = match NetworkInterface::show() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            warn!("Failed to enumerate network interfaces: {e}");
            return Vec::new();
        }
    };

    let mut candidates = Vec::new();
    for interface in interfaces {
        for addr in &interface.addr {
            let Addr::V4(v4) = addr else { continue };
            let ip = v4.ip;
            if ip.is_loopback() || ip.is_unspecified() || ip.is_link_local() {
                continue;
            }
            // Prefer the broadcast the OS reports; otherwise compute it from
            // the netmask, assuming /24 when no mask is available.
            let broadcast = v4
                .broadcast
                .unwrap_or_else(|| directed_broadcast(ip, v4.netmask.unwrap_or(DEFAULT_MASK)));
            debug!(
                "Interface {} has {ip}, broadcast candidate {broadcast}",
                interface.name
            );
            candidates.push(NetworkCandidate {
                addr: broadcast,
                provenance: Provenance::AutoDetected,
            });
        }
    }
    candidates
}

const DEFAULT_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);

/// Directed broadcast address for `ip` under `netmask`: host bits all set.
pub fn directed_broadcast(ip: Ipv4Addr, netmask: Ipv4Addr) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(ip) | !u32::from(netmask))
}
