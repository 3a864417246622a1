pub mod history;
pub mod scan;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use sweepr_common::config::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_POOL_SIZE, DEFAULT_PROBE_ATTEMPTS, DEFAULT_PROBE_TIMEOUT,
};
use sweepr_common::network::range::NetworkRange;

#[derive(Parser)]
#[command(name = "sweepr")]
#[command(version, about = "Finds live hosts on a network and the TCP ports they have open.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// Also write every debug event to this file
    #[arg(long, global = true, value_name = "FILE")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sweep a network range for live hosts and open ports
    #[command(alias = "s")]
    Scan(ScanArgs),
    /// List saved scans, or show one of them
    #[command(alias = "h")]
    History(HistoryArgs),
}

#[derive(Args)]
pub struct ScanArgs {
    /// Network to sweep: a.b.c.d/prefix, a.b.c.d/netmask or one address.
    /// Defaults to the network of the primary LAN interface
    #[arg(short, long, value_name = "CIDR")]
    pub range: Option<NetworkRange>,

    /// Ports to connect to: single ports, comma lists or lo-hi ranges.
    /// Defaults to every port
    #[arg(short, long, num_args = 1.., value_name = "PORTS")]
    pub ports: Vec<String>,

    /// Hosts probed or scanned at the same time
    #[arg(long, default_value_t = DEFAULT_POOL_SIZE)]
    pub pool_size: usize,

    /// Connects in flight against one host.
    /// Defaults to 16, or the pool size when that is smaller
    #[arg(long, value_name = "N")]
    pub port_concurrency: Option<usize>,

    /// Seconds to wait for a TCP connect
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs_f64())]
    pub timeout: f64,

    /// Seconds to wait for each liveness probe
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_PROBE_TIMEOUT.as_secs_f64())]
    pub probe_timeout: f64,

    /// Liveness probes sent before a host counts as silent
    #[arg(long, default_value_t = DEFAULT_PROBE_ATTEMPTS)]
    pub attempts: u32,

    /// Stop after this many seconds and keep what was found
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<f64>,

    /// Where scans are saved
    #[arg(long, value_name = "DIR")]
    pub history_dir: Option<PathBuf>,

    /// Do not save the scan
    #[arg(long)]
    pub no_save: bool,
}

#[derive(Args)]
pub struct HistoryArgs {
    /// Scan to show in full
    pub id: Option<String>,

    /// Where scans are saved
    #[arg(long, value_name = "DIR")]
    pub history_dir: Option<PathBuf>,
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
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

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_line_is_well_formed() {
        CommandLine::command().debug_assert();
    }

    #[test]
    fn scan_flags_parse() {
        let cli = CommandLine::try_parse_from([
            "sweepr", "scan", "-r", "10.0.0.0/30", "-p", "22", "80,443", "--deadline", "5",
        ])
        .unwrap();
        let Commands::Scan(args) = cli.command else {
            panic!("expected the scan command");
        };
        assert_eq!(args.range.unwrap().to_string(), "10.0.0.0/30");
        assert_eq!(args.ports, vec!["22", "80,443"]);
        assert_eq!(args.deadline, Some(5.0));
        assert_eq!(args.pool_size, DEFAULT_POOL_SIZE);
    }

    #[test]
    fn bad_range_is_rejected_by_the_parser() {
        let parsed = CommandLine::try_parse_from(["sweepr", "scan", "-r", "10.0.0.0/40"]);
        assert!(parsed.is_err());
    }
}
