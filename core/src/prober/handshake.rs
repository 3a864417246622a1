//! TCP handshake liveness probe, for when ICMP sockets are not available.
//!
//! Any answer on a common port counts: an accepted connection or a reset both
//! prove something is listening at the address.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use sweepr_common::error::{ScanError, is_resource_exhaustion};
use sweepr_common::network::probe::ProbeOutcome;
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::{HostProber, probe_with_attempts};

pub const COMMON_PORTS: [u16; 5] = [443, 80, 22, 445, 139];

#[derive(Debug, Clone)]
pub struct HandshakeProber {
    ports: Vec<u16>,
}

impl Default for HandshakeProber {
    fn default() -> Self {
        Self::with_ports(COMMON_PORTS.to_vec())
    }
}

impl HandshakeProber {
    pub fn with_ports(ports: Vec<u16>) -> Self {
        Self { ports }
    }
}

#[async_trait]
impl HostProber for HandshakeProber {
    async fn probe(
        &self,
        addr: IpAddr,
        probe_timeout: Duration,
        attempts: u32,
    ) -> Result<ProbeOutcome, ScanError> {
        probe_with_attempts(attempts, |_| async move {
            let knocks = self
                .ports
                .iter()
                .map(|&port| handshake(SocketAddr::new(addr, port), probe_timeout));
            fold_answers(join_all(knocks).await)
        })
        .await
    }
}

/// `None` means the attempt went unanswered.
async fn handshake(target: SocketAddr, probe_timeout: Duration) -> Option<io::Result<()>> {
    match timeout(probe_timeout, TcpStream::connect(target)).await {
        Ok(Ok(_stream)) => Some(Ok(())),
        Ok(Err(e)) => Some(Err(e)),
        Err(_elapsed) => None,
    }
}

fn fold_answers(answers: Vec<Option<io::Result<()>>>) -> Result<ProbeOutcome, ScanError> {
    let mut unreachable = false;
    let mut exhausted = None;

    for answer in answers.into_iter().flatten() {
        match answer {
            Ok(()) => return Ok(ProbeOutcome::Alive),
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                return Ok(ProbeOutcome::Alive);
            }
            Err(e) if is_resource_exhaustion(&e) => exhausted = Some(e),
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable
                ) =>
            {
                unreachable = true
            }
            Err(_) => {}
        }
    }

    if let Some(source) = exhausted {
        return Err(ScanError::ResourceExhausted {
            context: "opening a handshake probe",
            source,
        });
    }
    Ok(if unreachable {
        ProbeOutcome::Unreachable
    } else {
        ProbeOutcome::Timeout
    })
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
