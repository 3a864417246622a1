use std::fmt;

use serde::{Deserialize, Serialize};

/// Result of a liveness probe against one address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeOutcome {
    /// A reply came back.
    Alive,
    /// The network reported the destination as unreachable.
    Unreachable,
    /// Every attempt went unanswered.
    Timeout,
}

impl ProbeOutcome {
    pub fn is_alive(&self) -> bool {
        matches!(self, Self::Alive)
    }
}

/// Classification of one TCP connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortState {
    /// The handshake completed.
    Open,
    /// The host answered with a reset.
    Closed,
    /// No answer before the timeout, or the path dropped the attempt.
    Filtered,
}

impl PortState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Filtered => "filtered",
        }
    }
}

impl fmt::Display for PortState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortResult {
    pub port: u16,
    pub state: PortState,
}

impl PortResult {
    pub fn new(port: u16, state: PortState) -> Self {
        Self { port, state }
    }

    pub fn is_open(&self) -> bool {
        self.state == PortState::Open
    }
}
