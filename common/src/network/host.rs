use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::probe::PortResult;

/// A live host and the ports found open on it.
///
/// Built once the host's port scan has finished and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostResult {
    address: IpAddr,
    open_ports: Vec<PortResult>,
    scanned_at: DateTime<Utc>,
}

impl HostResult {
    /// Keeps the open entries of `results`, in the order given.
    pub fn new(address: IpAddr, results: Vec<PortResult>, scanned_at: DateTime<Utc>) -> Self {
        let open_ports = results.into_iter().filter(PortResult::is_open).collect();
        Self {
            address,
            open_ports,
            scanned_at,
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn open_ports(&self) -> &[PortResult] {
        &self.open_ports
    }

    pub fn open_port_numbers(&self) -> Vec<u16> {
        self.open_ports.iter().map(|p| p.port).collect()
    }

    pub fn scanned_at(&self) -> DateTime<Utc> {
        self.scanned_at
    }

    /// Equality that ignores when the host was scanned.
    pub fn same_findings(&self, other: &HostResult) -> bool {
        self.address == other.address && self.open_ports == other.open_ports
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
