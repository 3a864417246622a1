//! ICMP echo liveness probe.
//!
//! Unprivileged processes use a datagram ICMP socket, where the kernel owns the
//! echo identifier and only hands back our own replies. Root gets a raw socket,
//! sees every ICMP message on the host and has to do the filtering itself,
//! which also lets it notice destination-unreachable reports from routers.

use std::fmt;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use pnet::packet::Packet;
use pnet::packet::icmp::echo_reply::EchoReplyPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::icmp::{self, IcmpCode, IcmpPacket, IcmpTypes};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use sweepr_common::error::{ScanError, is_resource_exhaustion};
use sweepr_common::network::probe::ProbeOutcome;
use tracing::{debug, warn};

use super::{HostProber, probe_with_attempts};

const ECHO_PAYLOAD: &[u8; 8] = b"sweepr\0\0";
const ECHO_LEN: usize = 8 + ECHO_PAYLOAD.len();
const RECV_BUFFER: usize = 1500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Datagram,
    Raw,
}

impl SocketKind {
    fn socket_type(self) -> Type {
        match self {
            Self::Datagram => Type::DGRAM,
            Self::Raw => Type::RAW,
        }
    }

    fn open(self) -> io::Result<Socket> {
        Socket::new(Domain::IPV4, self.socket_type(), Some(Protocol::ICMPV4))
    }
}

impl fmt::Display for SocketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Datagram => f.write_str("datagram"),
            Self::Raw => f.write_str("raw"),
        }
    }
}

#[derive(Debug)]
pub struct IcmpProber {
    kind: SocketKind,
    identifier: u16,
    sequence: AtomicU16,
}

impl IcmpProber {
    /// Checks that an ICMP socket can be opened and returns a prober using it.
    pub fn open() -> io::Result<Self> {
        let kind = if is_root::is_root() {
            SocketKind::Raw
        } else {
            SocketKind::Datagram
        };
        drop(kind.open()?);

        Ok(Self {
            kind,
            identifier: rand::random(),
            sequence: AtomicU16::new(0),
        })
    }

    pub fn kind(&self) -> SocketKind {
        self.kind
    }

    fn next_sequence(&self) -> u16 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl HostProber for IcmpProber {
    async fn probe(
        &self,
        addr: IpAddr,
        timeout: Duration,
        attempts: u32,
    ) -> Result<ProbeOutcome, ScanError> {
        let IpAddr::V4(target) = addr else {
            debug!("Skipping ICMP probe of non-IPv4 address {addr}");
            return Ok(ProbeOutcome::Unreachable);
        };

        probe_with_attempts(attempts, |_| {
            let echo = Echo {
                kind: self.kind,
                target,
                identifier: self.identifier,
                sequence: self.next_sequence(),
            };
            async move {
                match tokio::task::spawn_blocking(move || echo.exchange(timeout)).await {
                    Ok(result) => outcome_from_io(target, result),
                    Err(e) => {
                        warn!("ICMP probe of {target} did not complete: {e}");
                        Ok(ProbeOutcome::Timeout)
                    }
                }
            }
        })
        .await
    }
}

fn outcome_from_io(
    target: Ipv4Addr,
    result: io::Result<ProbeOutcome>,
) -> Result<ProbeOutcome, ScanError> {
    match result {
        Ok(outcome) => Ok(outcome),
        Err(e) if is_resource_exhaustion(&e) => Err(ScanError::ResourceExhausted {
            context: "sending an ICMP echo",
            source: e,
        }),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable
            ) =>
        {
            Ok(ProbeOutcome::Unreachable)
        }
        Err(e) => {
            debug!("ICMP probe of {target} failed: {e}");
            Ok(ProbeOutcome::Timeout)
        }
    }
}

/// One echo request and the wait for its answer.
#[derive(Debug, Clone, Copy)]
struct Echo {
    kind: SocketKind,
    target: Ipv4Addr,
    identifier: u16,
    sequence: u16,
}

impl Echo {
    /// Blocking; runs on the blocking pool.
    fn exchange(&self, timeout: Duration) -> io::Result<ProbeOutcome> {
        let socket = self.kind.open()?;
        let dest = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(self.target, 0)));
        let request = echo_request(self.identifier, self.sequence);

        match self.kind {
            // Connecting makes the kernel report ICMP errors on the next read.
            SocketKind::Datagram => {
                socket.connect(&dest)?;
                socket.send(&request)?;
            }
            SocketKind::Raw => {
                socket.send_to(&request, &dest)?;
            }
        }

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; RECV_BUFFER];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(ProbeOutcome::Timeout);
            }
            socket.set_read_timeout(Some(remaining))?;

            let len = match (&socket).read(&mut buf) {
                Ok(len) => len,
                Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                    return Ok(ProbeOutcome::Timeout);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };

            if let Some(outcome) = self.classify(&buf[..len]) {
                return Ok(outcome);
            }
        }
    }

    /// Decides whether `bytes` answers this echo. `None` means "not ours".
    fn classify(&self, bytes: &[u8]) -> Option<ProbeOutcome> {
        let (source, icmp_bytes) = match self.kind {
            SocketKind::Datagram if !leads_with_ipv4_header(bytes) => (self.target, bytes),
            // Raw sockets, and datagram sockets on the BSDs, keep the IP header.
            SocketKind::Datagram | SocketKind::Raw => {
                let ip = Ipv4Packet::new(bytes)?;
                if ip.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
                    return None;
                }
                let offset = usize::from(ip.get_header_length()) * 4;
                (ip.get_source(), bytes.get(offset..)?)
            }
        };

        let packet = IcmpPacket::new(icmp_bytes)?;
        match packet.get_icmp_type() {
            IcmpTypes::EchoReply => {
                let reply = EchoReplyPacket::new(icmp_bytes)?;
                // Datagram sockets rewrite the identifier.
                let ours = source == self.target
                    && reply.get_sequence_number() == self.sequence
                    && (self.kind == SocketKind::Datagram
                        || reply.get_identifier() == self.identifier);
                ours.then_some(ProbeOutcome::Alive)
            }
            IcmpTypes::DestinationUnreachable => {
                // 4 unused bytes, then the header of the datagram that bounced.
                let quoted = Ipv4Packet::new(packet.payload().get(4..)?)?;
                (quoted.get_destination() == self.target).then_some(ProbeOutcome::Unreachable)
            }
            _ => None,
        }
    }
}

/// A bare ICMP message never starts with a version-4 nibble: no ICMP type
/// lies in 64..=79.
fn leads_with_ipv4_header(bytes: &[u8]) -> bool {
    bytes.first().is_some_and(|b| b >> 4 == 4)
}

fn echo_request(identifier: u16, sequence: u16) -> [u8; ECHO_LEN] {
    let mut buf = [0u8; ECHO_LEN];
    if let Some(mut packet) = MutableEchoRequestPacket::new(&mut buf) {
        packet.set_icmp_type(IcmpTypes::EchoRequest);
        packet.set_icmp_code(IcmpCode(0));
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);
        packet.set_payload(ECHO_PAYLOAD);
        let checksum = IcmpPacket::new(packet.packet())
            .map(|p| icmp::checksum(&p))
            .unwrap_or_default();
        packet.set_checksum(checksum);
    }
    buf
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
    use pnet::packet::icmp::echo_reply::MutableEchoReplyPacket;
    use pnet::packet::ipv4::MutableIpv4Packet;

    const TARGET: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 7);

    fn echo(kind: SocketKind) -> Echo {
        Echo {
            kind,
            target: TARGET,
            identifier: 0xbeef,
            sequence: 3,
        }
    }

    fn reply(identifier: u16, sequence: u16) -> Vec<u8> {
        let mut buf = vec![0u8; ECHO_LEN];
        let mut packet = MutableEchoReplyPacket::new(&mut buf).unwrap();
        packet.set_icmp_type(IcmpTypes::EchoReply);
        packet.set_identifier(identifier);
        packet.set_sequence_number(sequence);
        buf
    }

    fn wrap_ipv4(source: Ipv4Addr, destination: Ipv4Addr, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; 20 + payload.len()];
        let mut ip = MutableIpv4Packet::new(&mut buf).unwrap();
        ip.set_version(4);
        ip.set_header_length(5);
        ip.set_total_length((20 + payload.len()) as u16);
        ip.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
        ip.set_source(source);
        ip.set_destination(destination);
        ip.set_payload(payload);
        buf
    }

    #[test]
    fn echo_request_carries_a_valid_checksum() {
        let bytes = echo_request(0x1234, 9);
        let packet = IcmpPacket::new(&bytes).unwrap();
        assert_eq!(packet.get_icmp_type(), IcmpTypes::EchoRequest);
        assert_eq!(packet.get_checksum(), icmp::checksum(&packet));
        assert_ne!(packet.get_checksum(), 0);
    }

    #[test]
    fn datagram_reply_matches_on_sequence_only() {
        let echo = echo(SocketKind::Datagram);
        assert_eq!(echo.classify(&reply(0x0001, 3)), Some(ProbeOutcome::Alive));
        assert_eq!(echo.classify(&reply(0x0001, 4)), None);
    }

    #[test]
    fn datagram_reply_with_ip_header_is_unwrapped() {
        let echo = echo(SocketKind::Datagram);
        let me = Ipv4Addr::new(10, 0, 0, 1);

        let wrapped = wrap_ipv4(TARGET, me, &reply(0x0001, 3));
        assert_eq!(echo.classify(&wrapped), Some(ProbeOutcome::Alive));

        let stale = wrap_ipv4(TARGET, me, &reply(0x0001, 2));
        assert_eq!(echo.classify(&stale), None);

        let stranger = wrap_ipv4(Ipv4Addr::new(10, 0, 0, 9), me, &reply(0x0001, 3));
        assert_eq!(echo.classify(&stranger), None);
    }

    #[test]
    fn raw_reply_must_come_from_the_target() {
        let echo = echo(SocketKind::Raw);
        let ours = wrap_ipv4(TARGET, Ipv4Addr::new(10, 0, 0, 1), &reply(0xbeef, 3));
        let stranger = wrap_ipv4(
            Ipv4Addr::new(10, 0, 0, 9),
            Ipv4Addr::new(10, 0, 0, 1),
            &reply(0xbeef, 3),
        );
        let other_process = wrap_ipv4(TARGET, Ipv4Addr::new(10, 0, 0, 1), &reply(0xcafe, 3));

        assert_eq!(echo.classify(&ours), Some(ProbeOutcome::Alive));
        assert_eq!(echo.classify(&stranger), None);
        assert_eq!(echo.classify(&other_process), None);
    }

    #[test]
    fn destination_unreachable_for_the_target_is_reported() {
        let echo = echo(SocketKind::Raw);
        let me = Ipv4Addr::new(10, 0, 0, 1);
        let router = Ipv4Addr::new(10, 0, 0, 254);

        let quoted = wrap_ipv4(me, TARGET, &echo_request(0xbeef, 3));
        let mut unreachable = vec![0u8; 8];
        unreachable[0] = IcmpTypes::DestinationUnreachable.0;
        unreachable[1] = 1;
        unreachable.extend_from_slice(&quoted);

        let from_router = wrap_ipv4(router, me, &unreachable);
        assert_eq!(echo.classify(&from_router), Some(ProbeOutcome::Unreachable));

        let quoted_other = wrap_ipv4(me, Ipv4Addr::new(10, 0, 0, 8), &echo_request(0xbeef, 3));
        let mut unrelated = unreachable[..8].to_vec();
        unrelated.extend_from_slice(&quoted_other);
        assert_eq!(echo.classify(&wrap_ipv4(router, me, &unrelated)), None);
    }

    #[test]
    fn io_errors_map_onto_outcomes() {
        let unreachable = io::Error::from(io::ErrorKind::HostUnreachable);
        assert_eq!(
            outcome_from_io(TARGET, Err(unreachable)).unwrap(),
            ProbeOutcome::Unreachable
        );

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert_eq!(
            outcome_from_io(TARGET, Err(refused)).unwrap(),
            ProbeOutcome::Timeout
        );
    }

    #[cfg(unix)]
    #[test]
    fn descriptor_exhaustion_is_an_error() {
        let emfile = io::Error::from_raw_os_error(libc::EMFILE);
        assert!(matches!(
            outcome_from_io(TARGET, Err(emfile)),
            Err(ScanError::ResourceExhausted { .. })
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn loopback_answers_echo() {
        let prober = IcmpProber::open().unwrap();
        let outcome = prober
            .probe(IpAddr::V4(Ipv4Addr::LOCALHOST), Duration::from_secs(1), 1)
            .await
            .unwrap();
        assert_eq!(outcome, ProbeOutcome::Alive);
    }
}
