//! On-disk layout.
//!
//! Everything the engine persists lives next to the snapshot file and is
//! derived from its path:
//!
//! ```text
//! <base>.<ext>              snapshot (full store serialisation)
//! <base>.log                write-ahead log, one record per line
//! <base>.tmp                in-flight snapshot write, never a source of truth
//! <base>.backup_<ISO8601>   rotated pre-write backups
//! ```

use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct StorageLayout {
    snapshot: PathBuf,
    wal: PathBuf,
    tmp: PathBuf,
    dir: PathBuf,
    stem: String,
}

impl StorageLayout {
    pub fn new(snapshot_path: impl AsRef<Path>) -> Self {
        let snapshot = snapshot_path.as_ref().to_path_buf();
        let dir = snapshot
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let stem = snapshot
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "kiri".to_string());
        let wal = dir.join(format!("{stem}.log"));
        let tmp = dir.join(format!("{stem}.tmp"));
        Self {
            snapshot,
            wal,
            tmp,
            dir,
            stem,
        }
    }

    pub fn snapshot(&self) -> &Path {
        &self.snapshot
    }

    pub fn wal(&self) -> &Path {
        &self.wal
    }

    pub fn tmp(&self) -> &Path {
        &self.tmp
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Backup file name for a given instant. The timestamp format avoids
    /// `:` so names stay portable, and sorts lexicographically by time.
    pub fn backup_path(&self, at: DateTime<Utc>) -> PathBuf {
        let stamp = at.format("%Y-%m-%dT%H-%M-%S%.3fZ");
        self.dir.join(format!("{}.backup_{stamp}", self.stem))
    }

    /// Existing backups, newest first.
    pub fn list_backups(&self) -> io::Result<Vec<PathBuf>> {
        let prefix = format!("{}.backup_", self.stem);
        let mut backups = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_string_lossy().starts_with(&prefix) {
                backups.push(entry.path());
            }
        }
        backups.sort();
        backups.reverse();
        Ok(backups)
    }
}
