use std::sync::Arc;

use sweepr_common::network::ports::PortSet;
use sweepr_common::network::probe::ProbeOutcome;
use sweepr_core::persistence::{JsonHistoryStore, PersistenceSink};

use crate::support::{StubPortProbe, StubProber, config, scheduler, v4};

#[tokio::test]
async fn stored_scan_loads_back_unchanged() {
    let prober = StubProber::new()
        .answer(v4(172, 16, 0, 1), ProbeOutcome::Alive)
        .answer(v4(172, 16, 0, 2), ProbeOutcome::Unreachable);
    let ports = StubPortProbe::new().open(v4(172, 16, 0, 1), &[22, 8080]);
    let result = scheduler(config(4, 2), Arc::new(prober), Arc::new(ports))
        .scan(&"172.16.0.0/30".parse().unwrap(), &PortSet::new([22, 8080]).unwrap())
        .await;

    let dir = tempfile::tempdir().unwrap();
    let store = JsonHistoryStore::new(dir.path().join("history"));
    let first = store.store(&result).unwrap();
    let second = store.store(&result).unwrap();
    assert_ne!(first, second);

    assert_eq!(store.load(&first).unwrap(), result);

    let entries = store.list().unwrap();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| e.hosts == 1 && e.open_ports == 2 && e.complete));
}
