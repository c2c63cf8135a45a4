//! # Outbox Transport
//!
//! Delivers files by copying them into a spool directory drained by an
//! external uplink (modem daemon, rsync job, ...). A delivery succeeds once
//! the copy is complete under its final name.

use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::Transport;
use crate::batch::store::write_atomic;
use crate::error::Result;

/// Transport that spools files into a directory
#[derive(Debug, Clone)]
pub struct OutboxTransport {
    dir: PathBuf,
    sequence: u64,
}

impl OutboxTransport {
    /// Create the transport, creating `dir` if needed
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir: dir.as_ref().to_path_buf(),
            sequence: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Unique spool name: `<utc millis>-<sequence>-<original name>`
    fn spool_path(&mut self, source: &Path) -> PathBuf {
        self.sequence += 1;
        let name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "payload.json".to_string());
        self.dir.join(format!(
            "{}-{:06}-{}",
            Utc::now().timestamp_millis(),
            self.sequence,
            name
        ))
    }
}

#[async_trait]
impl Transport for OutboxTransport {
    async fn send(&mut self, path: &Path) -> bool {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Outbox: cannot read {}: {}", path.display(), e);
                return false;
            }
        };

        let target = self.spool_path(path);
        match write_atomic(&target, &bytes) {
            Ok(()) => {
                debug!("Outbox: spooled {} as {}", path.display(), target.display());
                true
            }
            Err(e) => {
                warn!("Outbox: cannot write {}: {}", target.display(), e);
                false
            }
        }
    }
}
