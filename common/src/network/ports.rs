//! # Port Set
//!
//! The ordered, deduplicated list of TCP ports probed on every live host.
//! Order is the caller's order (first occurrence wins), and the port scanner
//! reports results in exactly this order.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ScanError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<u16>", into = "Vec<u16>")]
pub struct PortSet {
    ports: Vec<u16>,
}

impl PortSet {
    /// Every TCP port, 1 through 65535.
    pub fn full() -> Self {
        Self {
            ports: (1..=u16::MAX).collect(),
        }
    }

    /// A set with no ports. Live hosts are still reported, with no open ports.
    pub fn empty() -> Self {
        Self { ports: Vec::new() }
    }

    /// Builds a set from raw port numbers, dropping repeats.
    ///
    /// Fails on port `0`, which cannot be connected to.
    pub fn new<I>(ports: I) -> Result<Self, ScanError>
    where
        I: IntoIterator<Item = u16>,
    {
        let mut seen: HashSet<u16> = HashSet::new();
        let mut ordered: Vec<u16> = Vec::new();
        for port in ports {
            if port == 0 {
                return Err(ScanError::invalid_port("0", "ports start at 1"));
            }
            if seen.insert(port) {
                ordered.push(port);
            }
        }
        Ok(Self { ports: ordered })
    }

    /// Parses a sequence of specs such as `["22", "80,443", "8000-8010"]`.
    pub fn parse_specs<S: AsRef<str>>(specs: &[S]) -> Result<Self, ScanError> {
        let mut ports: Vec<u16> = Vec::new();
        for spec in specs {
            ports.extend(parse_spec(spec.as_ref())?);
        }
        Self::new(ports)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.ports
    }
}

impl Default for PortSet {
    fn default() -> Self {
        Self::full()
    }
}

impl TryFrom<Vec<u16>> for PortSet {
    type Error = ScanError;

    fn try_from(ports: Vec<u16>) -> Result<Self, Self::Error> {
        Self::new(ports)
    }
}

impl From<PortSet> for Vec<u16> {
    fn from(set: PortSet) -> Self {
        set.ports
    }
}

impl FromStr for PortSet {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_specs(&[s])
    }
}

/// Parses one spec: "80", "80,443", "1-1024" or "80,443,8000-9000".
fn parse_spec(spec: &str) -> Result<Vec<u16>, ScanError> {
    let mut ports = Vec::new();

    for part in spec.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start, end)) = part.split_once('-') {
            let start = parse_port(start, spec)?;
            let end = parse_port(end, spec)?;
            if start > end {
                return Err(ScanError::invalid_port(
                    spec,
                    format!("range {start}-{end} is reversed"),
                ));
            }
            ports.extend(start..=end);
        } else {
            ports.push(parse_port(part, spec)?);
        }
    }

    Ok(ports)
}

fn parse_port(value: &str, spec: &str) -> Result<u16, ScanError> {
    let port = value
        .trim()
        .parse::<u16>()
        .map_err(|e| ScanError::invalid_port(spec, format!("'{}': {e}", value.trim())))?;
    if port == 0 {
        return Err(ScanError::invalid_port(spec, "ports start at 1"));
    }
    Ok(port)
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

    #[test]
    fn default_is_the_full_range() {
        let ports = PortSet::default();
        assert_eq!(ports.len(), 65_535);
        assert_eq!(ports.as_slice().first(), Some(&1));
        assert_eq!(ports.as_slice().last(), Some(&65_535));
    }

    #[test]
    fn duplicates_keep_first_position() {
        let ports = PortSet::new([443, 22, 80, 22, 443]).unwrap();
        assert_eq!(ports.as_slice(), &[443, 22, 80]);
    }

    #[test]
    fn specs_mix_lists_and_ranges() {
        let ports = PortSet::parse_specs(&["22", "80,443", "8000-8003"]).unwrap();
        assert_eq!(ports.as_slice(), &[22, 80, 443, 8000, 8001, 8002, 8003]);
    }

    #[test]
    fn invalid_specs_are_rejected() {
        for bad in ["0", "65536", "http", "90-80", "1-0"] {
            let err = bad.parse::<PortSet>().unwrap_err();
            assert!(matches!(err, ScanError::InvalidPort { .. }), "{bad}");
        }
    }

    #[test]
    fn deserializing_applies_the_same_rules() {
        let ports: PortSet = serde_json::from_str("[80, 22, 80]").unwrap();
        assert_eq!(ports.as_slice(), &[80, 22]);
        assert!(serde_json::from_str::<PortSet>("[22, 0]").is_err());
        assert_eq!(serde_json::to_string(&ports).unwrap(), "[80,22]");
    }

    #[test]
    fn empty_set_is_allowed() {
        assert!(PortSet::empty().is_empty());
        assert!(PortSet::new(Vec::new()).unwrap().is_empty());
    }
}
