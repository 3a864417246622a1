//! # Host Liveness Probing
//!
//! A [`HostProber`] answers one question for one address: is anything there?
//! Silence and unreachability are ordinary outcomes, reported through
//! [`ProbeOutcome`]. The only error a prober returns is
//! [`ScanError::ResourceExhausted`], when the local machine could not even
//! allocate the socket for the probe.

use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sweepr_common::error::ScanError;
use sweepr_common::network::probe::ProbeOutcome;
use tracing::{debug, warn};

pub mod handshake;
pub mod icmp;

pub use handshake::HandshakeProber;
pub use icmp::IcmpProber;

#[async_trait]
pub trait HostProber: Send + Sync {
    /// Sends up to `attempts` probes to `addr`, each bounded by `timeout`.
    ///
    /// Returns on the first reply or on an explicit unreachable report.
    async fn probe(
        &self,
        addr: IpAddr,
        timeout: Duration,
        attempts: u32,
    ) -> Result<ProbeOutcome, ScanError>;
}

/// Picks the best prober this process is allowed to use.
///
/// ICMP echo when an ICMP socket can be opened, a TCP handshake otherwise.
pub fn system_prober() -> Arc<dyn HostProber> {
    match IcmpProber::open() {
        Ok(prober) => {
            debug!("Using {} ICMP sockets for liveness probes", prober.kind());
            Arc::new(prober)
        }
        Err(e) => {
            warn!("ICMP unavailable ({e}), falling back to TCP handshake probes");
            Arc::new(HandshakeProber::default())
        }
    }
}

/// Runs `attempt` until it yields something other than a timeout.
///
/// At least one attempt is always made.
pub(crate) async fn probe_with_attempts<F, Fut>(
    attempts: u32,
    mut attempt: F,
) -> Result<ProbeOutcome, ScanError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ProbeOutcome, ScanError>>,
{
    for n in 0..attempts.max(1) {
        match attempt(n).await? {
            ProbeOutcome::Timeout => continue,
            outcome => return Ok(outcome),
        }
    }
    Ok(ProbeOutcome::Timeout)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
