//! # Scan Scheduler
//!
//! Drives one scan through two tiers:
//!
//! 1. every enumerated address gets a worker that holds a host pool slot
//!    while it probes for liveness;
//! 2. a live host's worker keeps that slot through its port scan, whose
//!    connects are bounded separately by the port scanner.
//!
//! The dispatch loop only waits on three things: a free pool slot, a finished
//! worker, or cancellation. A slow host therefore only ever costs its own slot.
//! Finished workers are folded into the [`ResultAggregator`] by this loop
//! alone, so the aggregator needs no locking.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use chrono::Utc;
use sweepr_common::config::ScanConfig;
use sweepr_common::error::ScanError;
use sweepr_common::network::host::HostResult;
use sweepr_common::network::ports::PortSet;
use sweepr_common::network::probe::ProbeOutcome;
use sweepr_common::network::range::NetworkRange;
use sweepr_common::scan::{PartialReason, ScanResult, ScanWarning};
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, debug_span, error, info, warn};

use crate::aggregator::ResultAggregator;
use crate::limits::{AdaptiveLimit, MAX_EXHAUSTION_RETRIES, exhaustion_backoff};
use crate::port_scan::{PortProbe, PortScanner};
use crate::prober::HostProber;
use crate::telemetry::Telemetry;

pub struct ScanScheduler {
    config: ScanConfig,
    prober: Arc<dyn HostProber>,
    scanner: Arc<PortScanner>,
    telemetry: Telemetry,
}

impl ScanScheduler {
    pub fn new(
        config: ScanConfig,
        prober: Arc<dyn HostProber>,
        port_probe: Arc<dyn PortProbe>,
        telemetry: Telemetry,
    ) -> Result<Self, ScanError> {
        config.validate()?;
        let scanner = Arc::new(PortScanner::new(port_probe, config.port_concurrency));
        Ok(Self {
            config,
            prober,
            scanner,
            telemetry,
        })
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    /// Scans `range` to completion.
    pub async fn scan(&self, range: &NetworkRange, ports: &PortSet) -> ScanResult {
        self.run(range, ports, CancellationToken::new()).await
    }

    /// Scans `range` until done or until `cancel` fires.
    ///
    /// A cancelled scan still returns every host resolved so far, marked
    /// partial. Addresses never dispatched count as skipped, workers cut off
    /// mid-flight as abandoned.
    pub async fn run(
        &self,
        range: &NetworkRange,
        ports: &PortSet,
        cancel: CancellationToken,
    ) -> ScanResult {
        let total = range.host_count();
        let mut aggregator = ResultAggregator::new(*range, ports.len(), Utc::now());
        aggregator.record_enumerated(total);
        self.telemetry.enumerated(total);

        self.telemetry.span().in_scope(|| {
            info!(
                "Scanning {total} addresses in {range}, {} ports each, pool of {} x {}",
                ports.len(),
                self.config.pool_size,
                self.scanner.concurrency()
            )
        });

        let ctx = Arc::new(HostContext {
            config: self.config.clone(),
            prober: self.prober.clone(),
            scanner: self.scanner.clone(),
            ports: ports.clone(),
            pool: AdaptiveLimit::new(self.config.pool_size),
            telemetry: self.telemetry.clone(),
        });

        let mut addresses = range.enumerate();
        let mut next = addresses.next();
        let mut workers: JoinSet<HostOutcome> = JoinSet::new();

        let finished = loop {
            if next.is_none() && workers.is_empty() {
                break true;
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break false,

                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    self.settle(&mut aggregator, joined);
                }

                permit = ctx.pool.acquire(), if next.is_some() => {
                    let Some((permit, addr)) = claim(permit, &mut next) else {
                        break false;
                    };
                    let addr = IpAddr::V4(addr);
                    let span = debug_span!(parent: self.telemetry.span(), "host", %addr);
                    workers.spawn(resolve_host(ctx.clone(), addr, permit).instrument(span));
                    next = addresses.next();
                }
            }
        };

        if !finished {
            let skipped = (next.into_iter().count() + addresses.count()) as u64;
            warn!(
                "Scan cancelled: {skipped} addresses never dispatched, {} in flight",
                workers.len()
            );
            aggregator.record_skipped(skipped);
            aggregator.mark_partial(PartialReason::Cancelled);
            self.telemetry.settled(skipped);

            workers.abort_all();
            while let Some(joined) = workers.join_next().await {
                self.settle(&mut aggregator, joined);
            }
        }

        let result = aggregator.freeze(Utc::now());
        self.telemetry.finish(&result);
        result
    }

    fn settle(&self, aggregator: &mut ResultAggregator, joined: Result<HostOutcome, JoinError>) {
        match joined {
            Ok(HostOutcome::NotAlive(outcome)) => aggregator.record_unresolved(outcome),
            Ok(HostOutcome::Alive { host, warnings }) => {
                aggregator.record_port_warnings(warnings);
                // Rejections are logged and flagged by the aggregator.
                let _ = aggregator.insert(host);
            }
            Ok(HostOutcome::Abandoned(warning)) => {
                aggregator.record_abandoned(PartialReason::ResourceExhausted, Some(warning))
            }
            Err(e) if e.is_cancelled() => {
                aggregator.record_abandoned(PartialReason::Cancelled, None)
            }
            Err(e) => {
                error!("Host worker failed: {e}");
                aggregator.record_abandoned(PartialReason::WorkerFailed, None)
            }
        }
        self.telemetry.settled(1);
    }
}

/// Pairs a pool slot with the next address, leaving `next` in place without a slot
/// so it is still counted as skipped.
fn claim(
    permit: Option<OwnedSemaphorePermit>,
    next: &mut Option<Ipv4Addr>,
) -> Option<(OwnedSemaphorePermit, Ipv4Addr)> {
    let permit = permit?;
    let addr = next.take()?;
    Some((permit, addr))
}

/// Everything a host worker needs, shared by all of them.
struct HostContext {
    config: ScanConfig,
    prober: Arc<dyn HostProber>,
    scanner: Arc<PortScanner>,
    ports: PortSet,
    pool: AdaptiveLimit,
    telemetry: Telemetry,
}

/// Terminal disposition of one address.
#[derive(Debug)]
enum HostOutcome {
    NotAlive(ProbeOutcome),
    Alive {
        host: HostResult,
        warnings: Vec<ScanWarning>,
    },
    Abandoned(ScanWarning),
}

impl HostOutcome {
    fn abandoned(address: IpAddr, message: impl Into<String>) -> Self {
        Self::Abandoned(ScanWarning {
            address,
            port: None,
            message: message.into(),
        })
    }
}

async fn resolve_host(
    ctx: Arc<HostContext>,
    addr: IpAddr,
    mut permit: OwnedSemaphorePermit,
) -> HostOutcome {
    let cfg = &ctx.config;
    let mut retry = 0;

    let outcome = loop {
        match ctx
            .prober
            .probe(addr, cfg.probe_timeout, cfg.probe_attempts)
            .await
        {
            Ok(outcome) => break outcome,
            Err(e) if retry < MAX_EXHAUSTION_RETRIES => {
                let shrunk = ctx.pool.shrink(permit);
                debug!("{e}, backing off (pool now {}, shrunk: {shrunk})", ctx.pool.current());
                tokio::time::sleep(exhaustion_backoff(retry)).await;
                retry += 1;
                permit = match ctx.pool.acquire().await {
                    Some(permit) => permit,
                    None => return HostOutcome::abandoned(addr, "host pool closed"),
                };
            }
            Err(e) => {
                warn!("Abandoning {addr}: {e}");
                return HostOutcome::abandoned(addr, e.to_string());
            }
        }
    };

    ctx.telemetry.host_probed(outcome.is_alive());
    if !outcome.is_alive() {
        debug!("{addr}: {outcome:?}");
        return HostOutcome::NotAlive(outcome);
    }

    // The probe's slot is released only once the port scan is done.
    let _slot = permit;
    debug!("{addr} is alive, scanning {} ports", ctx.ports.len());
    let scan = ctx
        .scanner
        .scan_ports(addr, &ctx.ports, cfg.connect_timeout)
        .await;
    ctx.telemetry.host_scanned();

    HostOutcome::Alive {
        host: HostResult::new(addr, scan.results, Utc::now()),
        warnings: scan.warnings,
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
