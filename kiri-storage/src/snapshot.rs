//! Snapshot persistence.
//!
//! The snapshot is a single JSON object mapping keys to values. Writes go
//! through `<base>.tmp` and commit with an atomic rename, so a crash at any
//! point leaves the previous snapshot intact; a leftover tmp file from an
//! earlier crash is simply overwritten. Before each write the current
//! snapshot is copied to a timestamped backup, and the oldest backups beyond
//! the retention limit are pruned.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter};

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};

use kiri_core::{Error, Result};

use crate::layout::StorageLayout;

/// Result of loading the snapshot at startup, possibly via a fallback.
pub struct RecoveredSnapshot {
    pub data: HashMap<String, Value>,
    /// Present when recovery had to degrade (backup restore or empty start).
    pub warning: Option<String>,
}

fn read_map(path: &std::path::Path) -> Result<HashMap<String, Value>> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| Error::Corruption {
        message: format!("snapshot {} unreadable: {e}", path.display()),
    })
}

/// Load the snapshot. Absence means an empty store. An unreadable snapshot
/// falls back to the newest intact backup (which is copied into place); if
/// every backup fails too the engine starts empty with a surfaced warning.
pub fn load(layout: &StorageLayout) -> Result<RecoveredSnapshot> {
    let path = layout.snapshot();
    if !path.exists() {
        return Ok(RecoveredSnapshot {
            data: HashMap::new(),
            warning: None,
        });
    }

    match read_map(path) {
        Ok(data) => Ok(RecoveredSnapshot {
            data,
            warning: None,
        }),
        Err(primary_err) => {
            warn!(error = %primary_err, "snapshot unreadable; trying backups");
            for backup in layout.list_backups()? {
                match read_map(&backup) {
                    Ok(data) => {
                        fs::copy(&backup, path)?;
                        let message =
                            format!("snapshot restored from backup {}", backup.display());
                        info!("{message}");
                        return Ok(RecoveredSnapshot {
                            data,
                            warning: Some(message),
                        });
                    }
                    Err(e) => {
                        warn!(backup = %backup.display(), error = %e, "backup unreadable");
                    }
                }
            }
            Ok(RecoveredSnapshot {
                data: HashMap::new(),
                warning: Some(format!(
                    "snapshot and all backups unreadable ({primary_err}); starting empty"
                )),
            })
        }
    }
}

/// Atomically persist the full store. Rename is the commit point.
pub fn write(
    layout: &StorageLayout,
    data: &HashMap<String, Value>,
    backup_retention: usize,
) -> Result<()> {
    if let Some(parent) = layout.snapshot().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    // pre-write backup of the surviving snapshot
    if layout.snapshot().exists() {
        let backup = layout.backup_path(Utc::now());
        fs::copy(layout.snapshot(), &backup)?;
    }

    let tmp = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(layout.tmp())?;
    let mut writer = BufWriter::new(tmp);
    serde_json::to_writer(&mut writer, data)?;
    let tmp = writer
        .into_inner()
        .map_err(|e| Error::durability("snapshot buffer flush failed", e.into_error()))?;
    tmp.sync_all()?;
    fs::rename(layout.tmp(), layout.snapshot())?;

    prune_backups(layout, backup_retention)?;
    Ok(())
}

fn prune_backups(layout: &StorageLayout, retention: usize) -> Result<()> {
    let backups = layout.list_backups()?;
    for stale in backups.iter().skip(retention) {
        if let Err(e) = fs::remove_file(stale) {
            warn!(backup = %stale.display(), error = %e, "failed to prune backup");
        }
    }
    Ok(())
}
