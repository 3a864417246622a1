//! # Result Aggregator
//!
//! Sole owner of the growing scan result. Host results arrive in whatever order
//! the workers finish; the map is keyed by address so the frozen result does
//! not depend on that order.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use sweepr_common::error::ScanError;
use sweepr_common::network::host::HostResult;
use sweepr_common::network::probe::ProbeOutcome;
use sweepr_common::network::range::NetworkRange;
use sweepr_common::scan::{
    PartialReason, ScanMeta, ScanResult, ScanStats, ScanStatus, ScanWarning,
};
use tracing::error;

#[derive(Debug)]
pub struct ResultAggregator {
    range: NetworkRange,
    port_count: usize,
    started_at: DateTime<Utc>,
    hosts: BTreeMap<IpAddr, HostResult>,
    stats: ScanStats,
    warnings: Vec<ScanWarning>,
    reasons: BTreeSet<PartialReason>,
}

impl ResultAggregator {
    pub fn new(range: NetworkRange, port_count: usize, started_at: DateTime<Utc>) -> Self {
        Self {
            range,
            port_count,
            started_at,
            hosts: BTreeMap::new(),
            stats: ScanStats::default(),
            warnings: Vec::new(),
            reasons: BTreeSet::new(),
        }
    }

    /// Collects every host of `stream`, then freezes.
    pub async fn aggregate<S>(mut self, stream: S) -> ScanResult
    where
        S: Stream<Item = HostResult>,
    {
        let mut stream = std::pin::pin!(stream);
        while let Some(host) = stream.next().await {
            // A rejected duplicate is already logged and marked on the result.
            if self.insert(host).is_ok() {
                self.stats.enumerated += 1;
            }
        }
        self.freeze(Utc::now())
    }

    pub fn record_enumerated(&mut self, count: u64) {
        self.stats.enumerated += count;
    }

    /// Adds a live host. The first report of an address wins.
    pub fn insert(&mut self, host: HostResult) -> Result<(), ScanError> {
        let addr = host.address();
        if self.hosts.contains_key(&addr) {
            error!("Host {addr} reported twice, keeping the first result");
            self.reasons.insert(PartialReason::DuplicateHost);
            self.warnings.push(ScanWarning {
                address: addr,
                port: None,
                message: "duplicate host report discarded".into(),
            });
            return Err(ScanError::DuplicateHost(addr));
        }
        self.hosts.insert(addr, host);
        self.stats.alive += 1;
        Ok(())
    }

    /// Records an address that was probed and found not alive.
    pub fn record_unresolved(&mut self, outcome: ProbeOutcome) {
        match outcome {
            ProbeOutcome::Unreachable => self.stats.unreachable += 1,
            ProbeOutcome::Timeout => self.stats.timed_out += 1,
            ProbeOutcome::Alive => {}
        }
    }

    /// Records an address that was dispatched but never finished.
    pub fn record_abandoned(&mut self, reason: PartialReason, warning: Option<ScanWarning>) {
        self.stats.abandoned += 1;
        self.reasons.insert(reason);
        self.warnings.extend(warning);
    }

    /// Records addresses that were never dispatched.
    pub fn record_skipped(&mut self, count: u64) {
        if count > 0 {
            self.stats.skipped += count;
            self.reasons.insert(PartialReason::Cancelled);
        }
    }

    /// Port-level warnings from a host that still produced a result.
    pub fn record_port_warnings(&mut self, warnings: Vec<ScanWarning>) {
        if !warnings.is_empty() {
            self.reasons.insert(PartialReason::ResourceExhausted);
            self.warnings.extend(warnings);
        }
    }

    pub fn mark_partial(&mut self, reason: PartialReason) {
        self.reasons.insert(reason);
    }

    pub fn stats(&self) -> &ScanStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn freeze(self, finished_at: DateTime<Utc>) -> ScanResult {
        let status = if self.reasons.is_empty() {
            ScanStatus::Complete
        } else {
            ScanStatus::Partial(self.reasons.into_iter().collect())
        };
        let meta = ScanMeta {
            range: self.range,
            port_count: self.port_count,
            started_at: self.started_at,
            finished_at,
        };
        ScanResult::new(meta, self.hosts, status, self.stats, self.warnings)
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

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::net::Ipv4Addr;
    use sweepr_common::network::probe::{PortResult, PortState};

    fn host(last: u8, open: &[u16]) -> HostResult {
        let ports = open
            .iter()
            .map(|&p| PortResult::new(p, PortState::Open))
            .collect();
        HostResult::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, last)), ports, Utc::now())
    }

    fn aggregator() -> ResultAggregator {
        ResultAggregator::new("10.0.0.0/29".parse().unwrap(), 2, Utc::now())
    }

    #[tokio::test]
    async fn arrival_order_does_not_matter() {
        let forward = aggregator()
            .aggregate(stream::iter(vec![host(1, &[22]), host(2, &[]), host(3, &[80])]))
            .await;
        let backward = aggregator()
            .aggregate(stream::iter(vec![host(3, &[80]), host(2, &[]), host(1, &[22])]))
            .await;

        assert!(forward.same_findings(&backward));
        let keys: Vec<_> = forward.hosts().keys().copied().collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
        assert!(forward.is_complete());
    }

    #[test]
    fn duplicate_host_is_rejected_and_marks_the_scan() {
        let mut agg = aggregator();
        agg.record_enumerated(2);
        agg.insert(host(1, &[22])).unwrap();
        let err = agg.insert(host(1, &[80])).unwrap_err();
        assert!(matches!(err, ScanError::DuplicateHost(_)));
        agg.record_unresolved(ProbeOutcome::Timeout);

        let result = agg.freeze(Utc::now());
        let kept = result.host(&IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))).unwrap();
        assert_eq!(kept.open_port_numbers(), vec![22]);
        assert_eq!(
            result.status(),
            &ScanStatus::Partial(vec![PartialReason::DuplicateHost])
        );
        assert_eq!(result.stats().accounted(), result.stats().enumerated);
    }

    #[test]
    fn every_disposition_is_counted() {
        let mut agg = aggregator();
        agg.record_enumerated(6);
        agg.insert(host(1, &[])).unwrap();
        agg.record_unresolved(ProbeOutcome::Unreachable);
        agg.record_unresolved(ProbeOutcome::Timeout);
        agg.record_abandoned(PartialReason::Cancelled, None);
        agg.record_skipped(2);

        let result = agg.freeze(Utc::now());
        let stats = result.stats();
        assert_eq!(stats.accounted(), 6);
        assert_eq!(stats.skipped, 2);
        assert_eq!(
            result.status(),
            &ScanStatus::Partial(vec![PartialReason::Cancelled])
        );
    }

    #[test]
    fn port_warnings_make_the_scan_partial() {
        let mut agg = aggregator();
        agg.record_port_warnings(vec![ScanWarning {
            address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            port: Some(80),
            message: "out of sockets".into(),
        }]);
        let result = agg.freeze(Utc::now());
        assert!(!result.is_complete());
        assert_eq!(result.warnings().len(), 1);
    }
}
