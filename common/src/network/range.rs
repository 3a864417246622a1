//! # Network Range Model
//!
//! A [`NetworkRange`] is an IPv4 network (base address + prefix length) and the
//! single source of the candidate addresses a scan will probe.
//!
//! ## Enumeration policy
//! * prefix `< 31`: the network and broadcast addresses are skipped.
//! * prefix `31`: both addresses are hosts (point-to-point link).
//! * prefix `32`: the one address is the host.
//!
//! Host bits in the base address are masked off, so `192.168.1.77/24` and
//! `192.168.1.0/24` are the same range.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use pnet::ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};

use crate::error::ScanError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkRange {
    network: Ipv4Addr,
    prefix: u8,
}

impl NetworkRange {
    /// Builds a range from a base address and prefix length.
    pub fn new(base: Ipv4Addr, prefix: u8) -> Result<Self, ScanError> {
        if prefix > 32 {
            return Err(ScanError::invalid_range(
                format!("{base}/{prefix}"),
                format!("prefix {prefix} exceeds 32"),
            ));
        }
        let network = Ipv4Addr::from(u32::from(base) & prefix_mask(prefix));
        Ok(Self { network, prefix })
    }

    /// Builds a range from a base address and a dotted netmask (e.g. `255.255.255.0`).
    pub fn with_mask(base: Ipv4Addr, mask: Ipv4Addr) -> Result<Self, ScanError> {
        let bits = u32::from(mask);
        let prefix = bits.leading_ones() as u8;
        if bits.checked_shl(prefix as u32).unwrap_or(0) != 0 {
            return Err(ScanError::invalid_range(
                format!("{base}/{mask}"),
                "netmask bits are not contiguous",
            ));
        }
        Self::new(base, prefix)
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix(&self) -> u8 {
        self.prefix
    }

    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !prefix_mask(self.prefix))
    }

    /// Number of addresses [`enumerate`](Self::enumerate) yields.
    pub fn host_count(&self) -> u64 {
        let (first, last) = self.host_bounds();
        u64::from(last) - u64::from(first) + 1
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let (first, last) = self.host_bounds();
        (first..=last).contains(&u32::from(addr))
    }

    /// Expands the range into its usable host addresses, ascending.
    ///
    /// The iterator is lazy and owns no shared state, so the range can be
    /// enumerated any number of times.
    pub fn enumerate(&self) -> impl DoubleEndedIterator<Item = Ipv4Addr> + Clone + use<> {
        let (first, last) = self.host_bounds();
        (first..=last).map(Ipv4Addr::from)
    }

    fn host_bounds(&self) -> (u32, u32) {
        let network = u32::from(self.network);
        let broadcast = u32::from(self.broadcast());
        if self.prefix < 31 {
            (network + 1, broadcast - 1)
        } else {
            (network, broadcast)
        }
    }
}

impl From<Ipv4Network> for NetworkRange {
    fn from(net: Ipv4Network) -> Self {
        let prefix = net.prefix();
        Self {
            network: Ipv4Addr::from(u32::from(net.ip()) & prefix_mask(prefix)),
            prefix,
        }
    }
}

impl FromStr for NetworkRange {
    type Err = ScanError;

    /// Parses a range.
    ///
    /// Supported formats:
    /// * **CIDR**: "192.168.1.0/24".
    /// * **Netmask**: "192.168.1.0/255.255.255.0".
    /// * **Host**: "192.168.1.5" (same as `/32`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some((ip_str, suffix)) = s.split_once('/') else {
            let addr = parse_base(s, s)?;
            return Self::new(addr, 32);
        };

        let base = parse_base(ip_str, s)?;

        if suffix.contains('.') {
            let mask = suffix
                .parse::<Ipv4Addr>()
                .map_err(|e| ScanError::invalid_range(s, format!("invalid netmask: {e}")))?;
            return Self::with_mask(base, mask);
        }

        let prefix = suffix
            .parse::<u8>()
            .map_err(|e| ScanError::invalid_range(s, format!("invalid prefix: {e}")))?;

        Self::new(base, prefix)
    }
}

impl TryFrom<String> for NetworkRange {
    type Error = ScanError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NetworkRange> for String {
    fn from(range: NetworkRange) -> Self {
        range.to_string()
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix)
    }
}

fn parse_base(ip_str: &str, original: &str) -> Result<Ipv4Addr, ScanError> {
    ip_str
        .trim()
        .parse::<Ipv4Addr>()
        .map_err(|e| ScanError::invalid_range(original, format!("invalid base address: {e}")))
}

fn prefix_mask(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - prefix)
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
