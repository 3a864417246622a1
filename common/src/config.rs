use std::time::Duration;

use crate::error::ScanError;

pub const DEFAULT_POOL_SIZE: usize = 50;
pub const DEFAULT_PORT_CONCURRENCY: usize = 16;
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 2;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Tuning knobs for one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Outer bound: hosts being probed or port-scanned at the same time.
    pub pool_size: usize,
    /// Inner bound: connect attempts in flight against a single host.
    pub port_concurrency: usize,
    /// Budget for one liveness probe attempt.
    pub probe_timeout: Duration,
    /// Liveness probe attempts before a host is declared timed out.
    pub probe_attempts: u32,
    /// Budget for one TCP connect.
    pub connect_timeout: Duration,
    /// Optional wall-clock budget for the whole scan.
    ///
    /// Enforced by whoever owns the cancellation token, not by the scheduler.
    pub deadline: Option<Duration>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            port_concurrency: DEFAULT_PORT_CONCURRENCY,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            probe_attempts: DEFAULT_PROBE_ATTEMPTS,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            deadline: None,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), ScanError> {
        if self.pool_size == 0 {
            return Err(ScanError::Configuration("pool size must be at least 1".into()));
        }
        if self.port_concurrency == 0 {
            return Err(ScanError::Configuration(
                "port concurrency must be at least 1".into(),
            ));
        }
        if self.port_concurrency > self.pool_size {
            return Err(ScanError::Configuration(format!(
                "port concurrency ({}) must not exceed the pool size ({})",
                self.port_concurrency, self.pool_size
            )));
        }
        if self.probe_attempts == 0 {
            return Err(ScanError::Configuration(
                "at least one probe attempt is required".into(),
            ));
        }
        if self.probe_timeout.is_zero() || self.connect_timeout.is_zero() {
            return Err(ScanError::Configuration("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    /// Worst case time a silent host can hold a pool slot during probing.
    pub fn probe_budget(&self) -> Duration {
        self.probe_timeout * self.probe_attempts
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
