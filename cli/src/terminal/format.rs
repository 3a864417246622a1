use colored::*;
use sweepr_common::network::host::HostResult;
use sweepr_common::network::ports::PortSet;
use sweepr_common::scan::{PartialReason, ScanStatus};

use crate::terminal::colors;

const LISTED_PORTS: usize = 8;

/// Short description of a port set: the ports themselves, or a count.
pub fn port_set_summary(ports: &PortSet) -> String {
    match ports.len() {
        0 => "none".to_string(),
        65535 => "all (1-65535)".to_string(),
        n if n <= LISTED_PORTS => join_ports(ports.as_slice()),
        n => format!("{n} ports"),
    }
}

pub fn join_ports(ports: &[u16]) -> String {
    ports
        .iter()
        .map(u16::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn host_to_key_value_pair(host: &HostResult) -> Vec<(String, ColoredString)> {
    let open = host.open_port_numbers();
    let ports = if open.is_empty() {
        "none".color(colors::MUTED)
    } else {
        join_ports(&open).color(colors::PORT_OPEN)
    };

    vec![
        (String::from("IPv4"), host.address().to_string().color(colors::IPV4_ADDR)),
        (String::from("Open"), ports),
        (
            String::from("Seen"),
            host.scanned_at()
                .format("%H:%M:%S")
                .to_string()
                .color(colors::TEXT_DEFAULT),
        ),
    ]
}

pub fn reason_str(reason: &PartialReason) -> &'static str {
    match reason {
        PartialReason::Cancelled => "cancelled",
        PartialReason::ResourceExhausted => "out of sockets",
        PartialReason::DuplicateHost => "duplicate host report",
        PartialReason::WorkerFailed => "worker failure",
    }
}

pub fn status_to_colored(status: &ScanStatus) -> ColoredString {
    match status {
        ScanStatus::Complete => "complete".green().bold(),
        ScanStatus::Partial(reasons) => {
            let reasons: Vec<&str> = reasons.iter().map(reason_str).collect();
            format!("partial ({})", reasons.join(", "))
                .color(colors::PARTIAL)
                .bold()
        }
    }
}
