//! # Port Scanner
//!
//! TCP connect scan of one live host. Connects run concurrently under their
//! own bound, independent of (and smaller than) the host pool, and the results
//! are put back into [`PortSet`] order before they leave this module.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sweepr_common::error::{ScanError, is_resource_exhaustion};
use sweepr_common::network::ports::PortSet;
use sweepr_common::network::probe::{PortResult, PortState};
use sweepr_common::scan::ScanWarning;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::limits::{AdaptiveLimit, MAX_EXHAUSTION_RETRIES, exhaustion_backoff};

/// A single connection attempt against one port.
#[async_trait]
pub trait PortProbe: Send + Sync {
    /// Classifies `target`. The only error is [`ScanError::ResourceExhausted`].
    async fn connect(&self, target: SocketAddr, timeout: Duration) -> Result<PortState, ScanError>;
}

/// Full TCP handshake through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnect;

#[async_trait]
impl PortProbe for TcpConnect {
    async fn connect(
        &self,
        target: SocketAddr,
        connect_timeout: Duration,
    ) -> Result<PortState, ScanError> {
        match timeout(connect_timeout, TcpStream::connect(target)).await {
            Ok(Ok(_stream)) => Ok(PortState::Open),
            Ok(Err(e)) => classify_connect_error(e),
            Err(_elapsed) => Ok(PortState::Filtered),
        }
    }
}

fn classify_connect_error(e: io::Error) -> Result<PortState, ScanError> {
    if e.kind() == io::ErrorKind::ConnectionRefused {
        return Ok(PortState::Closed);
    }
    if is_resource_exhaustion(&e) {
        return Err(ScanError::ResourceExhausted {
            context: "opening a TCP connection",
            source: e,
        });
    }
    Ok(PortState::Filtered)
}

/// Outcome of scanning every port of one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortScan {
    /// One entry per requested port, in request order.
    pub results: Vec<PortResult>,
    /// Ports that could not be classified because sockets ran out.
    pub warnings: Vec<ScanWarning>,
}

impl PortScan {
    pub fn exhausted(&self) -> bool {
        !self.warnings.is_empty()
    }
}

pub struct PortScanner {
    probe: Arc<dyn PortProbe>,
    concurrency: usize,
}

impl PortScanner {
    pub fn new(probe: Arc<dyn PortProbe>, concurrency: usize) -> Self {
        Self {
            probe,
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Connects to every port in `ports` on `addr`.
    ///
    /// A port that times out or is refused never stops the rest of the scan.
    /// When sockets run out the per-host bound shrinks and the port is
    /// retried; if it still cannot be opened it is reported as filtered and
    /// a warning is attached.
    pub async fn scan_ports(&self, addr: IpAddr, ports: &PortSet, timeout: Duration) -> PortScan {
        if ports.is_empty() {
            return PortScan::default();
        }

        let limit = AdaptiveLimit::new(self.concurrency);
        let limit = &limit;

        let mut scanned: Vec<(usize, PortResult, Option<ScanWarning>)> =
            stream::iter(ports.iter().enumerate())
                .map(|(idx, port)| async move {
                    let (state, warning) = self.scan_one(limit, addr, port, timeout).await;
                    (idx, PortResult::new(port, state), warning)
                })
                .buffer_unordered(self.concurrency)
                .collect()
                .await;

        scanned.sort_unstable_by_key(|(idx, _, _)| *idx);

        let mut scan = PortScan {
            results: Vec::with_capacity(scanned.len()),
            warnings: Vec::new(),
        };
        for (_, result, warning) in scanned {
            scan.results.push(result);
            scan.warnings.extend(warning);
        }
        if scan.exhausted() {
            debug!(
                "{addr}: {} ports left unclassified, concurrency fell to {}",
                scan.warnings.len(),
                limit.current()
            );
        }
        scan
    }

    async fn scan_one(
        &self,
        limit: &AdaptiveLimit,
        addr: IpAddr,
        port: u16,
        timeout: Duration,
    ) -> (PortState, Option<ScanWarning>) {
        let target = SocketAddr::new(addr, port);
        let mut retry = 0;

        loop {
            let Some(permit) = limit.acquire().await else {
                return (PortState::Filtered, Some(give_up(addr, port, "port limit closed")));
            };

            match self.probe.connect(target, timeout).await {
                Ok(state) => {
                    trace!("{target} is {state}");
                    return (state, None);
                }
                Err(e) if retry < MAX_EXHAUSTION_RETRIES => {
                    let shrunk = limit.shrink(permit);
                    debug!("{target}: {e}, backing off (shrunk: {shrunk})");
                    tokio::time::sleep(exhaustion_backoff(retry)).await;
                    retry += 1;
                }
                Err(e) => {
                    warn!("Giving up on {target}: {e}");
                    return (PortState::Filtered, Some(give_up(addr, port, &e.to_string())));
                }
            }
        }
    }
}

fn give_up(address: IpAddr, port: u16, message: &str) -> ScanWarning {
    ScanWarning {
        address,
        port: Some(port),
        message: message.to_string(),
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
