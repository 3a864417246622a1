//! # Resource Limits
//!
//! Keeps the two concurrency tiers inside what the process can actually open,
//! and gives both tiers the same way of backing off when sockets run out.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sweepr_common::config::ScanConfig;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

/// Share of the soft descriptor limit the scan is allowed to hold.
const FD_BUDGET_PERCENT: u64 = 80;

pub const MAX_EXHAUSTION_RETRIES: u32 = 3;
const BASE_BACKOFF: Duration = Duration::from_millis(50);

/// Delay before retry number `retry` (zero based) after running out of sockets.
pub fn exhaustion_backoff(retry: u32) -> Duration {
    BASE_BACKOFF * 2u32.saturating_pow(retry.min(6))
}

/// Soft `RLIMIT_NOFILE` of the current process, if it can be read.
#[cfg(unix)]
pub fn descriptor_limit() -> Option<u64> {
    use rlimit::Resource;

    match Resource::NOFILE.get() {
        Ok((soft, _hard)) => Some(soft),
        Err(e) => {
            debug!("Could not read the file descriptor limit: {e}");
            None
        }
    }
}

#[cfg(not(unix))]
pub fn descriptor_limit() -> Option<u64> {
    None
}

/// Lowers the concurrency bounds of `config` until they fit the descriptor budget.
///
/// Returns `true` when anything was changed.
pub fn fit_to_descriptor_budget(config: &mut ScanConfig) -> bool {
    match descriptor_limit() {
        Some(limit) => fit_to_limit(config, limit),
        None => false,
    }
}

pub fn fit_to_limit(config: &mut ScanConfig, soft_limit: u64) -> bool {
    let budget = (soft_limit * FD_BUDGET_PERCENT / 100).max(1);
    let demand = (config.pool_size as u64).saturating_mul(config.port_concurrency as u64);
    if demand <= budget {
        return false;
    }

    if config.pool_size as u64 > budget {
        config.pool_size = budget as usize;
    }
    let per_host = (budget / config.pool_size as u64).max(1) as usize;
    config.port_concurrency = config.port_concurrency.min(per_host);

    warn!(
        "Descriptor limit {soft_limit} is too low for the requested concurrency, \
         using {} hosts x {} ports",
        config.pool_size, config.port_concurrency
    );
    true
}

/// A concurrency bound that can shrink at runtime but never below one slot.
#[derive(Debug)]
pub struct AdaptiveLimit {
    semaphore: Arc<Semaphore>,
    limit: AtomicUsize,
}

impl AdaptiveLimit {
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            limit: AtomicUsize::new(limit),
        }
    }

    /// Waits for a free slot. `None` only if the limit has been closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.semaphore.clone().acquire_owned().await.ok()
    }

    /// Gives `permit` back, retiring its slot for good unless it is the last one.
    pub fn shrink(&self, permit: OwnedSemaphorePermit) -> bool {
        let shrunk = self
            .limit
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > 1).then(|| n - 1))
            .is_ok();
        if shrunk {
            permit.forget();
        }
        shrunk
    }

    pub fn current(&self) -> usize {
        self.limit.load(Ordering::SeqCst)
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
