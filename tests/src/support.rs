//! Instrumented stand-ins for the network probes.
//!
//! Each stub records how many calls were in flight at once, so scenarios can
//! check the scheduler's concurrency bounds from the outside.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sweepr_common::config::ScanConfig;
use sweepr_common::error::ScanError;
use sweepr_common::network::probe::{PortState, ProbeOutcome};
use sweepr_core::port_scan::PortProbe;
use sweepr_core::prober::HostProber;
use sweepr_core::{ScanScheduler, Telemetry};
use tracing::Span;

pub fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(a, b, c, d))
}

/// Counts concurrent holders and remembers the highest count seen.
#[derive(Debug, Default)]
pub struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    pub fn enter(&self) -> GaugeGuard<'_> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        GaugeGuard(self)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct GaugeGuard<'a>(&'a Gauge);

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Liveness answers from a table; unknown addresses time out.
#[derive(Debug, Default)]
pub struct StubProber {
    outcomes: HashMap<IpAddr, ProbeOutcome>,
    delays: HashMap<IpAddr, Duration>,
    silent: Vec<IpAddr>,
    default_delay: Duration,
    in_flight: Gauge,
    calls: AtomicUsize,
    finished: Mutex<Vec<IpAddr>>,
}

impl StubProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn answer(mut self, addr: IpAddr, outcome: ProbeOutcome) -> Self {
        self.outcomes.insert(addr, outcome);
        self
    }

    pub fn delay(mut self, addr: IpAddr, delay: Duration) -> Self {
        self.delays.insert(addr, delay);
        self
    }

    /// `addr` never answers: every attempt waits out its full timeout.
    pub fn silent(mut self, addr: IpAddr) -> Self {
        self.silent.push(addr);
        self
    }

    pub fn default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub fn peak(&self) -> usize {
        self.in_flight.peak()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Addresses in the order their probes completed.
    pub fn finished(&self) -> Vec<IpAddr> {
        self.finished.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl HostProber for StubProber {
    async fn probe(
        &self,
        addr: IpAddr,
        timeout: Duration,
        attempts: u32,
    ) -> Result<ProbeOutcome, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = self.in_flight.enter();

        if self.silent.contains(&addr) {
            for _ in 0..attempts.max(1) {
                tokio::time::sleep(timeout).await;
            }
            return Ok(ProbeOutcome::Timeout);
        }

        let delay = self.delays.get(&addr).copied().unwrap_or(self.default_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if let Ok(mut finished) = self.finished.lock() {
            finished.push(addr);
        }
        Ok(self.outcomes.get(&addr).copied().unwrap_or(ProbeOutcome::Timeout))
    }
}

/// Connect answers from a table; unknown ports are closed.
#[derive(Debug, Default)]
pub struct StubPortProbe {
    open: HashMap<IpAddr, Vec<u16>>,
    delay: Option<fn(u16) -> Duration>,
    total: Gauge,
    per_host: Mutex<HashMap<IpAddr, Arc<Gauge>>>,
}

impl StubPortProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(mut self, addr: IpAddr, ports: &[u16]) -> Self {
        self.open.insert(addr, ports.to_vec());
        self
    }

    /// Delays every connect by `delay(port)`.
    pub fn delay_by(mut self, delay: fn(u16) -> Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn total_peak(&self) -> usize {
        self.total.peak()
    }

    /// Highest number of connects in flight against any single host.
    pub fn host_peak(&self) -> usize {
        self.per_host
            .lock()
            .map(|hosts| hosts.values().map(|g| g.peak()).max().unwrap_or(0))
            .unwrap_or(0)
    }

    fn host_gauge(&self, addr: IpAddr) -> Arc<Gauge> {
        match self.per_host.lock() {
            Ok(mut hosts) => hosts.entry(addr).or_default().clone(),
            Err(_) => Arc::default(),
        }
    }
}

#[async_trait]
impl PortProbe for StubPortProbe {
    async fn connect(&self, target: SocketAddr, _: Duration) -> Result<PortState, ScanError> {
        let host = self.host_gauge(target.ip());
        let _total = self.total.enter();
        let _host = host.enter();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay(target.port())).await;
        }

        let open = self
            .open
            .get(&target.ip())
            .is_some_and(|ports| ports.contains(&target.port()));
        Ok(if open { PortState::Open } else { PortState::Closed })
    }
}

pub fn config(pool_size: usize, port_concurrency: usize) -> ScanConfig {
    ScanConfig {
        pool_size,
        port_concurrency,
        probe_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_millis(200),
        ..Default::default()
    }
}

pub fn scheduler(
    config: ScanConfig,
    prober: Arc<dyn HostProber>,
    ports: Arc<dyn PortProbe>,
) -> ScanScheduler {
    match ScanScheduler::new(config, prober, ports, Telemetry::new(Span::none())) {
        Ok(scheduler) => scheduler,
        Err(e) => panic!("test config rejected: {e}"),
    }
}
