//! End-to-end scenarios for the scan engine, driven through stub probes so
//! they run without touching the network.

pub mod support;

#[cfg(test)]
mod scan;
#[cfg(test)]
mod history;
