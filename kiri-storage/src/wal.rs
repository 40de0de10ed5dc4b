//! Write-Ahead Log (WAL)
//!
//! One self-delimited JSON record per line:
//!
//! ```text
//! {"op":"put","k":"user:1","v":{"name":"aiko"}}
//! {"op":"ttl","k":"session:9","exp":1716210000000}
//! {"op":"del","k":"user:1"}
//! {"op":"clr"}
//! ```
//!
//! Every acknowledged mutation hits this file before the in-memory state
//! changes. Replay applies well-formed lines in order and skips malformed
//! ones (including a truncated trailing line from a crash mid-append) with
//! a warning.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use kiri_core::{Error, Result};

/// Operation tag of a WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalOp {
    Put,
    Del,
    Clr,
    Ttl,
}

/// One logged operation. `k` is required except for `clr`; `put` carries
/// `v`, `ttl` carries `exp` (ms since epoch).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalRecord {
    pub op: WalOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl WalRecord {
    pub fn put(key: impl Into<String>, value: Value) -> Self {
        Self {
            op: WalOp::Put,
            k: Some(key.into()),
            v: Some(value),
            exp: None,
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self {
            op: WalOp::Del,
            k: Some(key.into()),
            v: None,
            exp: None,
        }
    }

    pub fn clr() -> Self {
        Self {
            op: WalOp::Clr,
            k: None,
            v: None,
            exp: None,
        }
    }

    pub fn ttl(key: impl Into<String>, exp: u64) -> Self {
        Self {
            op: WalOp::Ttl,
            k: Some(key.into()),
            v: None,
            exp: Some(exp),
        }
    }

    /// Structural validity beyond being parseable JSON.
    pub fn is_well_formed(&self) -> bool {
        match self.op {
            WalOp::Put => self.k.is_some() && self.v.is_some(),
            WalOp::Del => self.k.is_some(),
            WalOp::Clr => true,
            WalOp::Ttl => self.k.is_some() && self.exp.is_some(),
        }
    }
}

struct WalFile {
    writer: BufWriter<File>,
    records: u64,
}

/// Append handle over the log file. Appends happen under the store's write
/// pipeline; the internal lock only guards the buffered writer itself.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalFile>,
    sync_on_write: bool,
}

impl Wal {
    /// Open the log for appending, creating it if absent.
    pub fn open(path: impl AsRef<Path>, sync_on_write: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            inner: Mutex::new(WalFile {
                writer: BufWriter::new(file),
                records: 0,
            }),
            sync_on_write,
        })
    }

    /// Append one record. The record is on disk (or at least handed to the
    /// OS; fsynced when `sync_on_write`) when this returns. Failures are
    /// durability errors: the caller must not apply the mutation.
    pub fn append(&self, record: &WalRecord) -> Result<()> {
        let mut line = serde_json::to_string(record).map_err(|e| Error::Serialization {
            message: format!("failed to encode WAL record: {e}"),
        })?;
        line.push('\n');

        let mut inner = self.inner.lock();
        inner
            .writer
            .write_all(line.as_bytes())
            .map_err(|e| Error::durability("WAL append failed", e))?;
        inner
            .writer
            .flush()
            .map_err(|e| Error::durability("WAL flush failed", e))?;
        if self.sync_on_write {
            inner
                .writer
                .get_ref()
                .sync_all()
                .map_err(|e| Error::durability("WAL fsync failed", e))?;
        }
        inner.records += 1;
        Ok(())
    }

    /// Records appended since this handle was opened.
    pub fn appended(&self) -> u64 {
        self.inner.lock().records
    }

    /// Truncate the log. Called at the compaction commit point, under the
    /// writer critical section.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.writer.flush()?;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        file.sync_all()?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        *inner = WalFile {
            writer: BufWriter::new(file),
            records: 0,
        };
        debug!(path = %self.path.display(), "WAL truncated");
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.writer.flush()?;
        inner.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Read every well-formed record from a log file. A missing file is an
    /// empty log. Returns the records and how many lines were skipped.
    pub fn replay(path: impl AsRef<Path>) -> Result<(Vec<WalRecord>, usize)> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
            Err(e) => return Err(e.into()),
        };

        let reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut skipped = 0usize;
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            match serde_json::from_str::<WalRecord>(trimmed) {
                Ok(record) if record.is_well_formed() => records.push(record),
                Ok(_) => {
                    warn!(line = line_no + 1, "skipping structurally invalid WAL record");
                    skipped += 1;
                }
                Err(_) => {
                    warn!(line = line_no + 1, "skipping malformed WAL line");
                    skipped += 1;
                }
            }
        }
        Ok((records, skipped))
    }
}
