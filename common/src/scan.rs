//! # Scan Result Model
//!
//! The frozen outcome of one scan: every live host keyed by address, plus the
//! bookkeeping needed to tell a complete scan from a partial one.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::network::host::HostResult;
use crate::network::range::NetworkRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PartialReason {
    /// The cancellation signal fired before every address was resolved.
    Cancelled,
    /// Sockets or descriptors ran out and some work was abandoned.
    ResourceExhausted,
    /// The aggregator rejected a duplicate host report.
    DuplicateHost,
    /// A host worker died before reporting.
    WorkerFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScanStatus {
    Complete,
    Partial(Vec<PartialReason>),
}

/// Something the scan had to give up on, kept so partial results explain themselves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub address: IpAddr,
    pub port: Option<u16>,
    pub message: String,
}

/// Terminal disposition of every enumerated address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanStats {
    pub enumerated: u64,
    pub alive: u64,
    pub unreachable: u64,
    pub timed_out: u64,
    /// Dispatched but dropped: resource exhaustion or cancellation mid-flight.
    pub abandoned: u64,
    /// Never dispatched because the scan was cancelled first.
    pub skipped: u64,
}

impl ScanStats {
    /// Sum of all terminal dispositions; equals `enumerated` for a consistent scan.
    pub fn accounted(&self) -> u64 {
        self.alive + self.unreachable + self.timed_out + self.abandoned + self.skipped
    }
}

/// Identity of a scan run, fixed before the first probe goes out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMeta {
    pub range: NetworkRange,
    pub port_count: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanResult {
    meta: ScanMeta,
    hosts: BTreeMap<IpAddr, HostResult>,
    status: ScanStatus,
    stats: ScanStats,
    warnings: Vec<ScanWarning>,
}

impl ScanResult {
    pub fn new(
        meta: ScanMeta,
        hosts: BTreeMap<IpAddr, HostResult>,
        status: ScanStatus,
        stats: ScanStats,
        warnings: Vec<ScanWarning>,
    ) -> Self {
        Self {
            meta,
            hosts,
            status,
            stats,
            warnings,
        }
    }

    pub fn meta(&self) -> &ScanMeta {
        &self.meta
    }

    pub fn hosts(&self) -> &BTreeMap<IpAddr, HostResult> {
        &self.hosts
    }

    pub fn host(&self, addr: &IpAddr) -> Option<&HostResult> {
        self.hosts.get(addr)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn status(&self) -> &ScanStatus {
        &self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == ScanStatus::Complete
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn warnings(&self) -> &[ScanWarning] {
        &self.warnings
    }

    /// Equality on what was found, ignoring every timestamp.
    pub fn same_findings(&self, other: &ScanResult) -> bool {
        self.meta.range == other.meta.range
            && self.meta.port_count == other.meta.port_count
            && self.status == other.status
            && self.stats == other.stats
            && self.hosts.len() == other.hosts.len()
            && self
                .hosts
                .values()
                .zip(other.hosts.values())
                .all(|(a, b)| a.same_findings(b))
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
