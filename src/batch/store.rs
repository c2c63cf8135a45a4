//! # Batch Store
//!
//! Owns the persisted filesystem layout under the log directory:
//!
//! | Path | Content |
//! |------|---------|
//! | `gnss_<id>.json` | One batch file per flush |
//! | `backlog.txt` | JSON array of pending batch ids |
//! | `tmp_gnss.json` | Scratch file for single-fix sends |
//! | `gnss_log.txt` | Append-only audit trail, one JSON line per fix |
//!
//! Batch files and the backlog state are replaced atomically (write to a
//! sibling `.tmp` file, sync, rename), so a crash mid-write never leaves a
//! truncated file under the final name.

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::codec::{self, WireFormat};
use super::{Batch, BatchId};
use crate::error::Result;
use crate::gnss::Fix;

/// Batch file name prefix
pub const BATCH_PREFIX: &str = "gnss_";

/// Single-fix scratch file; never matches `gnss_<digits>.json`
pub const SCRATCH_FILE: &str = "tmp_gnss.json";

/// Backlog state file
pub const BACKLOG_FILE: &str = "backlog.txt";

/// Audit trail of every sampled fix
pub const AUDIT_FILE: &str = "gnss_log.txt";

/// One line of the audit trail
#[derive(Debug, Serialize)]
struct AuditRecord<'a> {
    logged_at: String,
    #[serde(flatten)]
    fix: &'a Fix,
}

/// Paths and file operations for persisted batches
#[derive(Debug, Clone)]
pub struct BatchStore {
    dir: PathBuf,
}

impl BatchStore {
    /// Create a store rooted at `dir` (created if missing)
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the batch file for `id`
    pub fn batch_path(&self, id: BatchId) -> PathBuf {
        self.dir.join(format!("{}{}.json", BATCH_PREFIX, id))
    }

    pub fn scratch_path(&self) -> PathBuf {
        self.dir.join(SCRATCH_FILE)
    }

    pub fn backlog_path(&self) -> PathBuf {
        self.dir.join(BACKLOG_FILE)
    }

    pub fn audit_path(&self) -> PathBuf {
        self.dir.join(AUDIT_FILE)
    }

    /// Whether a batch file exists for `id`
    pub fn exists(&self, id: BatchId) -> bool {
        self.batch_path(id).is_file()
    }

    /// First id at or after `preferred` that has no batch file yet
    ///
    /// Batch files are written exactly once, so a batch whose last fix
    /// repeats an earlier timestamp is moved to the next free second.
    pub fn allocate_id(&self, preferred: BatchId) -> BatchId {
        let mut id = preferred;
        while self.exists(id) {
            id += 1;
        }
        id
    }

    /// Write the batch file for `id`
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails; no partial file is left
    /// under the batch name.
    pub fn write_batch(&self, id: BatchId, batch: &Batch, format: WireFormat) -> Result<PathBuf> {
        let path = self.batch_path(id);
        let bytes = codec::to_wire(batch, format)?;
        write_atomic(&path, &bytes)?;
        debug!("Wrote {} ({} fixes, {} bytes)", path.display(), batch.len(), bytes.len());
        Ok(path)
    }

    /// Read back the batch file for `id`
    ///
    /// # Errors
    ///
    /// Returns error if the file is missing or not a batch
    pub fn read_batch(&self, id: BatchId, format: WireFormat) -> Result<Batch> {
        let bytes = fs::read(self.batch_path(id))?;
        codec::from_wire(&bytes, format)
    }

    /// Delete the batch file for `id`
    ///
    /// Returns `Ok(false)` if there was no file to delete.
    pub fn delete_batch(&self, id: BatchId) -> io::Result<bool> {
        remove_if_exists(&self.batch_path(id))
    }

    /// Overwrite the scratch file with a single-fix batch tagged with `device`
    ///
    /// # Errors
    ///
    /// Returns error if encoding or writing fails
    pub fn write_scratch(&self, fix: &Fix, device: Option<&str>, format: WireFormat) -> Result<PathBuf> {
        let path = self.scratch_path();
        let single = Batch::from(vec![*fix]).with_device(device.map(str::to_string));
        let bytes = codec::to_wire(&single, format)?;
        fs::write(&path, bytes)?;
        Ok(path)
    }

    pub fn delete_scratch(&self) -> io::Result<bool> {
        remove_if_exists(&self.scratch_path())
    }

    /// Append one fix to the audit trail
    ///
    /// # Errors
    ///
    /// Returns error if the audit file cannot be opened or written
    pub fn append_audit(&self, fix: &Fix) -> Result<()> {
        let record = AuditRecord {
            logged_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            fix,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_path())?;
        file.write_all(&line)?;
        Ok(())
    }
}

/// Replace `path` atomically: write a sibling `.tmp`, sync it, rename over.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    let mut file = File::create(&tmp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)
}

fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
