//! # Scan Telemetry
//!
//! Handed to the scheduler for the lifetime of one scan. Every worker runs
//! inside its span, progress is counted here, and `finish` emits the summary.
//! Progress is advisory and never feeds back into the scan.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sweepr_common::network::ports::PortSet;
use sweepr_common::network::range::NetworkRange;
use sweepr_common::scan::{ScanResult, ScanStatus};
use tracing::{Span, info, info_span, warn};

pub type ProgressCallback = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub enumerated: u64,
    pub probed: u64,
    pub alive: u64,
    pub scanned: u64,
    pub remaining: u64,
}

#[derive(Debug, Default)]
struct Counters {
    enumerated: AtomicU64,
    probed: AtomicU64,
    alive: AtomicU64,
    scanned: AtomicU64,
    settled: AtomicU64,
}

#[derive(Clone)]
pub struct Telemetry {
    span: Span,
    counters: Arc<Counters>,
    on_progress: Option<ProgressCallback>,
}

impl fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Telemetry")
            .field("span", &self.span)
            .field("progress", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl Telemetry {
    pub fn new(span: Span) -> Self {
        Self {
            span,
            counters: Arc::default(),
            on_progress: None,
        }
    }

    /// Telemetry with a span describing the scan of `range` over `ports`.
    pub fn for_scan(range: &NetworkRange, ports: &PortSet) -> Self {
        Self::new(info_span!("scan", range = %range, ports = ports.len()))
    }

    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let c = &self.counters;
        let enumerated = c.enumerated.load(Ordering::Relaxed);
        ProgressSnapshot {
            enumerated,
            probed: c.probed.load(Ordering::Relaxed),
            alive: c.alive.load(Ordering::Relaxed),
            scanned: c.scanned.load(Ordering::Relaxed),
            remaining: enumerated.saturating_sub(c.settled.load(Ordering::Relaxed)),
        }
    }

    pub(crate) fn enumerated(&self, count: u64) {
        self.counters.enumerated.store(count, Ordering::Relaxed);
        self.report();
    }

    pub(crate) fn host_probed(&self, alive: bool) {
        self.counters.probed.fetch_add(1, Ordering::Relaxed);
        if alive {
            self.counters.alive.fetch_add(1, Ordering::Relaxed);
        }
        self.report();
    }

    pub(crate) fn host_scanned(&self) {
        self.counters.scanned.fetch_add(1, Ordering::Relaxed);
        self.report();
    }

    /// An address reached its terminal disposition.
    pub(crate) fn settled(&self, count: u64) {
        self.counters.settled.fetch_add(count, Ordering::Relaxed);
        self.report();
    }

    fn report(&self) {
        if let Some(callback) = &self.on_progress {
            callback(self.snapshot());
        }
    }

    /// Logs the closing summary under the scan span.
    pub fn finish(&self, result: &ScanResult) {
        let _guard = self.span.enter();
        let stats = result.stats();
        let open: usize = result.hosts().values().map(|h| h.open_ports().len()).sum();
        let elapsed = result.meta().finished_at - result.meta().started_at;

        match result.status() {
            ScanStatus::Complete => info!(
                hosts = result.len(),
                open_ports = open,
                elapsed_ms = elapsed.num_milliseconds(),
                "Scan complete: {} of {} addresses alive",
                stats.alive,
                stats.enumerated
            ),
            ScanStatus::Partial(reasons) => warn!(
                hosts = result.len(),
                open_ports = open,
                abandoned = stats.abandoned,
                skipped = stats.skipped,
                "Scan incomplete ({reasons:?}): {} of {} addresses alive",
                stats.alive,
                stats.enumerated
            ),
        }
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
