use std::sync::Arc;
use std::time::{Duration, Instant};

use sweepr_common::config::ScanConfig;
use sweepr_common::network::ports::PortSet;
use sweepr_common::network::probe::ProbeOutcome;
use sweepr_common::network::range::NetworkRange;
use sweepr_common::scan::{PartialReason, ScanStatus};
use sweepr_core::prober::{HandshakeProber, HostProber};
use tokio_util::sync::CancellationToken;

use crate::support::{StubPortProbe, StubProber, config, scheduler, v4};

fn range(cidr: &str) -> NetworkRange {
    cidr.parse().unwrap()
}

#[tokio::test]
async fn only_live_hosts_with_open_ports_are_reported() {
    let prober = StubProber::new()
        .answer(v4(10, 0, 0, 1), ProbeOutcome::Alive)
        .answer(v4(10, 0, 0, 2), ProbeOutcome::Timeout);
    let ports = StubPortProbe::new().open(v4(10, 0, 0, 1), &[22]);

    let result = scheduler(config(8, 2), Arc::new(prober), Arc::new(ports))
        .scan(&range("10.0.0.0/30"), &PortSet::new([22, 80]).unwrap())
        .await;

    assert!(result.is_complete());
    assert_eq!(result.len(), 1);
    let host = result.host(&v4(10, 0, 0, 1)).unwrap();
    assert_eq!(host.open_port_numbers(), vec![22]);
    assert!(result.host(&v4(10, 0, 0, 2)).is_none());

    let stats = result.stats();
    assert_eq!(stats.enumerated, 2);
    assert_eq!((stats.alive, stats.timed_out), (1, 1));
}

#[tokio::test]
async fn empty_port_set_still_reports_live_hosts() {
    let prober = StubProber::new().answer(v4(10, 0, 0, 1), ProbeOutcome::Alive);
    let ports = Arc::new(StubPortProbe::new());

    let result = scheduler(config(4, 2), Arc::new(prober), ports.clone())
        .scan(&range("10.0.0.0/30"), &PortSet::empty())
        .await;

    let host = result.host(&v4(10, 0, 0, 1)).unwrap();
    assert!(host.open_ports().is_empty());
    assert_eq!(ports.total_peak(), 0);
}

#[tokio::test]
async fn concurrency_bounds_hold_under_load() {
    let cfg = config(4, 3);
    let net = range("10.1.0.0/27");
    let mut prober = StubProber::new().default_delay(Duration::from_millis(15));
    for addr in net.enumerate() {
        prober = prober.answer(addr.into(), ProbeOutcome::Alive);
    }
    let prober = Arc::new(prober);
    let ports = Arc::new(StubPortProbe::new().delay_by(|_| Duration::from_millis(5)));

    let result = scheduler(cfg.clone(), prober.clone(), ports.clone())
        .scan(&net, &PortSet::new(1..=12).unwrap())
        .await;

    assert_eq!(result.len(), 30);
    assert!(prober.peak() <= cfg.pool_size, "probe peak {}", prober.peak());
    assert!(prober.peak() > 1, "probes never overlapped");
    assert!(ports.host_peak() <= cfg.port_concurrency, "host peak {}", ports.host_peak());
    assert!(ports.total_peak() <= cfg.pool_size * cfg.port_concurrency);
}

#[tokio::test]
async fn open_ports_keep_port_set_order() {
    let addr = v4(10, 0, 0, 1);
    let prober = StubProber::new().answer(addr, ProbeOutcome::Alive);
    // High ports answer last, and the set leads with them.
    let ports = StubPortProbe::new()
        .open(addr, &[21, 22, 80, 443, 8080])
        .delay_by(|port| Duration::from_millis(u64::from(port) / 300));

    let result = scheduler(config(8, 8), Arc::new(prober), Arc::new(ports))
        .scan(&range("10.0.0.1/32"), &PortSet::parse_specs(&["8080,443", "20-22", "80"]).unwrap())
        .await;

    let host = result.host(&addr).unwrap();
    assert_eq!(host.open_port_numbers(), vec![8080, 443, 21, 22, 80]);
}

#[tokio::test]
async fn slow_host_holds_only_its_own_slot() {
    let slow = v4(10, 2, 0, 1);
    let prober = Arc::new(
        StubProber::new()
            .delay(slow, Duration::from_millis(400))
            .default_delay(Duration::from_millis(10)),
    );

    let result = scheduler(config(2, 1), prober.clone(), Arc::new(StubPortProbe::new()))
        .scan(&range("10.2.0.0/28"), &PortSet::empty())
        .await;

    assert_eq!(result.stats().timed_out, 14);
    let finished = prober.finished();
    assert_eq!(finished.len(), 14);
    assert_eq!(finished.last(), Some(&slow));
}

#[tokio::test]
async fn silent_address_costs_at_most_timeout_times_attempts() {
    let silent = v4(10, 5, 0, 2);
    let prober = StubProber::new()
        .answer(v4(10, 5, 0, 1), ProbeOutcome::Alive)
        .silent(silent);
    let cfg = ScanConfig {
        probe_timeout: Duration::from_millis(100),
        probe_attempts: 2,
        ..config(4, 2)
    };
    let budget = cfg.probe_budget();

    let started = Instant::now();
    let result = scheduler(cfg, Arc::new(prober), Arc::new(StubPortProbe::new()))
        .scan(&range("10.5.0.0/30"), &PortSet::new([22]).unwrap())
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed >= budget, "finished in {elapsed:?}");
    assert!(elapsed < budget + Duration::from_millis(500), "took {elapsed:?}");
    assert!(result.host(&silent).is_none());
    assert!(result.host(&v4(10, 5, 0, 1)).is_some());
    assert_eq!(result.stats().timed_out, 1);
    assert!(result.is_complete());
}

#[tokio::test]
#[ignore = "needs a network that drops TEST-NET-1 traffic"]
async fn handshake_to_unrouted_address_stays_within_budget() {
    let probe_timeout = Duration::from_millis(100);
    let prober = HandshakeProber::with_ports(vec![9]);

    let started = Instant::now();
    let outcome = prober
        .probe(v4(192, 0, 2, 1), probe_timeout, 2)
        .await
        .unwrap();

    assert!(!outcome.is_alive());
    assert!(started.elapsed() < probe_timeout * 2 + Duration::from_millis(500));
}

#[tokio::test]
async fn repeated_scans_find_the_same_things() {
    let build = || {
        let prober = StubProber::new()
            .answer(v4(10, 3, 0, 1), ProbeOutcome::Alive)
            .answer(v4(10, 3, 0, 4), ProbeOutcome::Alive)
            .answer(v4(10, 3, 0, 5), ProbeOutcome::Unreachable)
            .default_delay(Duration::from_millis(2));
        let ports = StubPortProbe::new()
            .open(v4(10, 3, 0, 1), &[22, 443])
            .open(v4(10, 3, 0, 4), &[80]);
        scheduler(config(3, 2), Arc::new(prober), Arc::new(ports))
    };
    let net = range("10.3.0.0/29");
    let ports = PortSet::new([22, 80, 443]).unwrap();

    let first = build().scan(&net, &ports).await;
    let second = build().scan(&net, &ports).await;

    assert!(first.same_findings(&second));
    assert_eq!(first.len(), 2);
}

#[tokio::test]
async fn cancellation_keeps_what_was_found() {
    let fast = v4(10, 4, 0, 1);
    let mut prober = StubProber::new()
        .answer(fast, ProbeOutcome::Alive)
        .delay(fast, Duration::ZERO)
        .default_delay(Duration::from_secs(30));
    for last in 2..=6 {
        prober = prober.answer(v4(10, 4, 0, last), ProbeOutcome::Alive);
    }
    let ports = StubPortProbe::new().open(fast, &[22]);
    let sched = scheduler(config(2, 1), Arc::new(prober), Arc::new(ports));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let result = sched
        .run(&range("10.4.0.0/29"), &PortSet::new([22]).unwrap(), cancel)
        .await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(
        result.status(),
        &ScanStatus::Partial(vec![PartialReason::Cancelled])
    );
    assert_eq!(result.host(&fast).unwrap().open_port_numbers(), vec![22]);

    let stats = result.stats();
    assert_eq!(stats.alive, 1);
    assert!(stats.abandoned > 0);
    assert!(stats.skipped > 0);
    assert_eq!(stats.accounted(), stats.enumerated);
}
