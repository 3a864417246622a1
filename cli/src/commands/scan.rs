use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use colored::*;
use sweepr_common::config::{DEFAULT_PORT_CONCURRENCY, ScanConfig};
use sweepr_common::network::interface::{LocalInterfaces, NetworkInspector};
use sweepr_common::network::ports::PortSet;
use sweepr_common::network::range::NetworkRange;
use sweepr_common::scan::ScanResult;
use sweepr_core::limits;
use sweepr_core::persistence::{JsonHistoryStore, PersistenceSink, ScanId};
use sweepr_core::port_scan::TcpConnect;
use sweepr_core::prober;
use sweepr_core::{ScanScheduler, Telemetry};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::commands::ScanArgs;
use crate::mprint;
use crate::terminal::{colors, format, print, spinner};

const KEY_WIDTH: usize = 12;

pub async fn scan(args: ScanArgs) -> anyhow::Result<()> {
    let range = match args.range {
        Some(range) => range,
        None => LocalInterfaces
            .default_range()
            .context("no --range given and no LAN interface to take it from")?,
    };
    let ports = if args.ports.is_empty() {
        PortSet::full()
    } else {
        PortSet::parse_specs(&args.ports)?
    };

    let mut config = scan_config(&args)?;
    config.validate()?;
    limits::fit_to_descriptor_budget(&mut config);

    print::header("scan");
    print_plan(&range, &ports, &config);

    let telemetry = Telemetry::for_scan(&range, &ports)
        .with_progress(Arc::new(spinner::report_scan_progress));
    let scheduler = ScanScheduler::new(
        config,
        prober::system_prober(),
        Arc::new(TcpConnect),
        telemetry,
    )?;

    let cancel = CancellationToken::new();
    let deadline = scheduler.config().deadline;
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone(), deadline));

    let start_time = Instant::now();
    spinner::get_spinner().start("Scanning Network");
    let result = scheduler.run(&range, &ports, cancel).await;
    spinner::get_spinner().stop();
    watcher.abort();

    print_result(&result, start_time.elapsed());

    if args.no_save {
        return Ok(());
    }
    let store = match args.history_dir {
        Some(dir) => JsonHistoryStore::new(dir),
        None => JsonHistoryStore::default_location()?,
    };
    let id = save(&result, &store)?;
    print::aligned_line("Saved as", id.to_string(), KEY_WIDTH);
    Ok(())
}

/// Hands a finished scan to `store`. The scan itself stays valid on failure.
fn save(result: &ScanResult, store: &JsonHistoryStore) -> anyhow::Result<ScanId> {
    let id = store
        .store(result)
        .context("the scan finished but could not be saved")?;
    info!("Scan {id} stored in {}", store.dir().display());
    Ok(id)
}

fn scan_config(args: &ScanArgs) -> anyhow::Result<ScanConfig> {
    Ok(ScanConfig {
        pool_size: args.pool_size,
        port_concurrency: args
            .port_concurrency
            .unwrap_or(DEFAULT_PORT_CONCURRENCY.min(args.pool_size)),
        probe_timeout: seconds("--probe-timeout", args.probe_timeout)?,
        probe_attempts: args.attempts,
        connect_timeout: seconds("--timeout", args.timeout)?,
        deadline: args.deadline.map(|d| seconds("--deadline", d)).transpose()?,
    })
}

fn seconds(flag: &str, value: f64) -> anyhow::Result<Duration> {
    match Duration::try_from_secs_f64(value) {
        Ok(duration) if !duration.is_zero() => Ok(duration),
        _ => bail!("{flag} must be a positive number of seconds, got {value}"),
    }
}

/// Cancels the scan on Ctrl-C or once `deadline` has passed.
async fn cancel_on_signal(cancel: CancellationToken, deadline: Option<Duration>) {
    let expired = async move {
        match deadline {
            Some(limit) => tokio::time::sleep(limit).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, keeping the hosts found so far"),
        _ = expired => warn!("Deadline reached, keeping the hosts found so far"),
    }
    cancel.cancel();
}

fn print_plan(range: &NetworkRange, ports: &PortSet, config: &ScanConfig) {
    print::aligned_line("Range", range.to_string(), KEY_WIDTH);
    print::aligned_line("Addresses", range.host_count().to_string(), KEY_WIDTH);
    print::aligned_line("Ports", format::port_set_summary(ports), KEY_WIDTH);
    print::aligned_line(
        "Concurrency",
        format!("{} hosts x {} ports", config.pool_size, config.port_concurrency),
        KEY_WIDTH,
    );
    print::aligned_line(
        "Per address",
        format!("at most {:.1}s to answer", config.probe_budget().as_secs_f64()),
        KEY_WIDTH,
    );
    if let Some(deadline) = config.deadline {
        print::aligned_line("Deadline", format!("{:.1}s", deadline.as_secs_f64()), KEY_WIDTH);
    }
}

pub fn print_result(result: &ScanResult, elapsed: Duration) {
    if result.is_empty() {
        print::header("zero hosts detected");
        print::no_results();
    } else {
        print::header("live hosts");
        for (idx, host) in result.hosts().values().enumerate() {
            print::tree_head(idx, &host.address().to_string());
            print::as_tree_one_level(format::host_to_key_value_pair(host));
            if idx + 1 != result.len() {
                mprint!();
            }
        }
    }

    for warning in result.warnings() {
        match warning.port {
            Some(port) => warn!("{}:{port}: {}", warning.address, warning.message),
            None => warn!("{}: {}", warning.address, warning.message),
        }
    }

    print_summary(result, elapsed);
}

fn print_summary(result: &ScanResult, elapsed: Duration) {
    let stats = result.stats();
    let hosts: ColoredString = format!("{} live hosts", result.len()).bold().green();
    let addresses: ColoredString = format!("{} addresses", stats.enumerated).bold();
    let total_time: ColoredString = format!("{:.2}s", elapsed.as_secs_f64()).bold().yellow();
    let output = format!("Sweep finished: {hosts} of {addresses} in {total_time}")
        .color(colors::TEXT_DEFAULT)
        .to_string();

    print::fat_separator();
    print::centerln(&output);
    print::aligned_line("Status", format::status_to_colored(result.status()), KEY_WIDTH);
    if !result.is_complete() {
        print::aligned_line(
            "Unresolved",
            format!("{} abandoned, {} skipped", stats.abandoned, stats.skipped),
            KEY_WIDTH,
        );
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
