//! # Scan Persistence
//!
//! The scan engine hands its frozen result to a [`PersistenceSink`] and is done.
//! A failed save never invalidates the result; callers report it separately.
//!
//! [`JsonHistoryStore`] keeps one pretty-printed JSON document per scan, named
//! after the scan's start time.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sweepr_common::error::ScanError;
use sweepr_common::network::range::NetworkRange;
use sweepr_common::scan::ScanResult;
use tracing::{debug, warn};

const EXTENSION: &str = "json";
const ID_FORMAT: &str = "%Y%m%d%H%M%S";

/// Identifier of a stored scan.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScanId(String);

impl ScanId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScanId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

pub trait PersistenceSink: Send + Sync {
    fn store(&self, result: &ScanResult) -> Result<ScanId, ScanError>;
}

/// Summary of one stored scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: ScanId,
    pub range: NetworkRange,
    pub started_at: DateTime<Utc>,
    pub hosts: usize,
    pub open_ports: usize,
    pub complete: bool,
}

impl HistoryEntry {
    fn new(id: ScanId, result: &ScanResult) -> Self {
        Self {
            id,
            range: result.meta().range,
            started_at: result.meta().started_at,
            hosts: result.len(),
            open_ports: result.hosts().values().map(|h| h.open_ports().len()).sum(),
            complete: result.is_complete(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    dir: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/sweepr/history` for the current user.
    pub fn default_location() -> Result<Self, ScanError> {
        let data = dirs::data_dir()
            .ok_or_else(|| ScanError::Persistence("no data directory for this user".into()))?;
        Ok(Self::new(data.join("sweepr").join("history")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self, id: &ScanId) -> Result<ScanResult, ScanError> {
        let path = self.path_of(id.as_str());
        let content = fs::read_to_string(&path)
            .map_err(|e| persistence(format!("cannot read {}", path.display()), e))?;
        serde_json::from_str(&content)
            .map_err(|e| persistence(format!("{} is not a scan", path.display()), e))
    }

    /// Every readable scan in the store, newest first.
    pub fn list(&self) -> Result<Vec<HistoryEntry>, ScanError> {
        let dir = match fs::read_dir(&self.dir) {
            Ok(dir) => dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(persistence(format!("cannot open {}", self.dir.display()), e));
            }
        };

        let mut entries = Vec::new();
        for file in dir.flatten() {
            let path = file.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let id = ScanId::from(stem);
            match self.load(&id) {
                Ok(result) => entries.push(HistoryEntry::new(id, &result)),
                Err(e) => warn!("Skipping {}: {e}", path.display()),
            }
        }

        entries.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{EXTENSION}"))
    }

    /// Creates the file for a new scan, suffixing the id if that second is taken.
    fn create(&self, started_at: DateTime<Utc>) -> Result<(ScanId, fs::File), ScanError> {
        let stamp = started_at.format(ID_FORMAT).to_string();
        for n in 0u32.. {
            let id = if n == 0 {
                stamp.clone()
            } else {
                format!("{stamp}-{n}")
            };
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.path_of(&id))
            {
                Ok(file) => return Ok((ScanId(id), file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(persistence(format!("cannot create scan {id}"), e)),
            }
        }
        Err(ScanError::Persistence(format!("no free id for scan {stamp}")))
    }
}

impl PersistenceSink for JsonHistoryStore {
    fn store(&self, result: &ScanResult) -> Result<ScanId, ScanError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| persistence(format!("cannot create {}", self.dir.display()), e))?;

        let json = serde_json::to_string_pretty(result)
            .map_err(|e| persistence("cannot encode scan".to_string(), e))?;

        let (id, mut file) = self.create(result.meta().started_at)?;
        let written = file.write_all(json.as_bytes()).and_then(|()| file.sync_all());
        drop(file);
        discard_on_failure(&self.path_of(id.as_str()), written)
            .map_err(|e| persistence(format!("cannot write scan {id}"), e))?;

        debug!("Stored scan {id} in {}", self.dir.display());
        Ok(id)
    }
}

/// Removes a half-written scan file so `list` never trips over it.
fn discard_on_failure(path: &Path, written: io::Result<()>) -> io::Result<()> {
    if written.is_err() {
        if let Err(e) = fs::remove_file(path) {
            warn!("Could not remove partial scan {}: {e}", path.display());
        }
    }
    written
}

fn persistence(what: String, cause: impl fmt::Display) -> ScanError {
    ScanError::Persistence(format!("{what}: {cause}"))
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
