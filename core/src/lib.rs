//! The concurrent scanning engine: liveness probing, bounded port scanning,
//! scheduling across both tiers, aggregation and the persistence hand-off.

pub mod aggregator;
pub mod limits;
pub mod persistence;
pub mod port_scan;
pub mod prober;
pub mod scheduler;
pub mod telemetry;

pub use scheduler::ScanScheduler;
pub use telemetry::Telemetry;
