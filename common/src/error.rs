//! # Error Taxonomy
//!
//! Only configuration-time problems, local resource exhaustion and persistence
//! failures are errors. A host that does not answer, or a port that refuses a
//! connection, is a normal outcome and lives in [`crate::network::probe`].

use std::io;
use std::net::IpAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScanError {
    /// The network range could not be parsed or denotes no usable host.
    #[error("invalid network range '{input}': {reason}")]
    InvalidRange { input: String, reason: String },

    /// A port specification contained something outside 1-65535.
    #[error("invalid port specification '{input}': {reason}")]
    InvalidPort { input: String, reason: String },

    /// Scan options that cannot work together.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A socket or file descriptor could not be allocated.
    #[error("local resource exhausted while {context}: {source}")]
    ResourceExhausted {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    /// The same address reached the aggregator twice.
    #[error("host {0} was reported more than once")]
    DuplicateHost(IpAddr),

    /// The scan finished but could not be saved.
    #[error("failed to persist scan: {0}")]
    Persistence(String),

    /// The local network configuration could not be inspected.
    #[error("network interface error: {0}")]
    Interface(String),
}

impl ScanError {
    pub fn invalid_range(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRange {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_port(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPort {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// True for errors detected before any packet leaves the machine.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. } | Self::InvalidPort { .. } | Self::Configuration(_)
        )
    }
}

/// Returns true when `err` means the process ran out of sockets or descriptors.
pub fn is_resource_exhaustion(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE) | Some(libc::ENFILE) | Some(libc::ENOBUFS) | Some(libc::ENOMEM)
        )
    }
    #[cfg(not(unix))]
    {
        matches!(err.kind(), io::ErrorKind::OutOfMemory)
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
