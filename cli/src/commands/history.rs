use std::time::Duration;

use anyhow::Context;
use colored::*;
use sweepr_core::persistence::{HistoryEntry, JsonHistoryStore, ScanId};

use crate::commands::HistoryArgs;
use crate::commands::scan::print_result;
use crate::mprint;
use crate::terminal::{colors, print};

pub fn history(args: HistoryArgs) -> anyhow::Result<()> {
    let store = match args.history_dir {
        Some(dir) => JsonHistoryStore::new(dir),
        None => JsonHistoryStore::default_location()?,
    };

    match args.id {
        Some(id) => show(&store, &ScanId::from(id.as_str())),
        None => list(&store),
    }
}

fn list(store: &JsonHistoryStore) -> anyhow::Result<()> {
    let entries = store.list()?;
    print::header("saved scans");
    if entries.is_empty() {
        print::print_status(format!("Nothing saved in {}", store.dir().display()));
        return Ok(());
    }

    for (idx, entry) in entries.iter().enumerate() {
        print::tree_head(idx, entry.id.as_str());
        print::as_tree_one_level(entry_to_key_value_pair(entry));
        if idx + 1 != entries.len() {
            mprint!();
        }
    }
    Ok(())
}

fn show(store: &JsonHistoryStore, id: &ScanId) -> anyhow::Result<()> {
    let result = store
        .load(id)
        .with_context(|| format!("no saved scan named {id}"))?;
    let meta = result.meta();

    print::header(&format!("scan {id}"));
    print::aligned_line("Range", meta.range.to_string(), 12);
    print::aligned_line(
        "Started",
        meta.started_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
        12,
    );
    let elapsed = (meta.finished_at - meta.started_at)
        .to_std()
        .unwrap_or(Duration::ZERO);
    print_result(&result, elapsed);
    Ok(())
}

fn entry_to_key_value_pair(entry: &HistoryEntry) -> Vec<(String, ColoredString)> {
    let complete = if entry.complete {
        "complete".green()
    } else {
        "partial".color(colors::PARTIAL)
    };

    vec![
        (
            String::from("Started"),
            entry
                .started_at
                .format("%Y-%m-%d %H:%M:%S")
                .to_string()
                .color(colors::TEXT_DEFAULT),
        ),
        (String::from("Range"), entry.range.to_string().color(colors::IPV4_ADDR)),
        (String::from("Hosts"), entry.hosts.to_string().color(colors::PRIMARY)),
        (String::from("Open"), entry.open_ports.to_string().color(colors::PORT_OPEN)),
        (String::from("Status"), complete),
    ]
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
    fn unknown_id_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path());
        assert!(show(&store, &ScanId::from("19700101000000")).is_err());
    }

    #[test]
    fn empty_store_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path().join("missing"));
        assert!(list(&store).is_ok());
    }
}
