//! # Backlog Module
//!
//! Durable FIFO of batch ids that failed to transmit and await retry.
//!
//! This module handles:
//! - Idempotent admission of failed batches (only if their file exists)
//! - Oldest-first access for the retry scheduler
//! - Removal paired with deletion of the batch file, or lazy pruning when
//!   the file already vanished
//! - Mirroring the id list to `backlog.txt` and restoring it at boot
//!
//! Every id in the queue refers to a batch file on disk. Mutations are kept
//! in memory until [`BacklogQueue::persist`] replaces the state file.

use std::collections::VecDeque;
use std::fs;
use std::io;
use tracing::{debug, info, warn};

use crate::batch::store::{write_atomic, BatchStore};
use crate::batch::BatchId;
use crate::error::Result;

/// Outcome of [`BacklogQueue::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// Id removed and its batch file deleted
    Deleted,
    /// Id removed; its batch file was already gone
    Pruned,
    /// Id was not queued; nothing changed
    NotQueued,
}

/// Ordered set of pending batch ids, oldest first
#[derive(Debug, Clone)]
pub struct BacklogQueue {
    store: BatchStore,
    ids: VecDeque<BatchId>,
}

impl BacklogQueue {
    /// Create an empty queue over `store`
    pub fn new(store: BatchStore) -> Self {
        Self {
            store,
            ids: VecDeque::new(),
        }
    }

    /// Restore the queue from the state file
    ///
    /// A missing, unreadable or corrupt state file yields an empty queue;
    /// boot never fails because of backlog state. Duplicate ids are dropped.
    pub fn load(store: BatchStore) -> Self {
        let path = store.backlog_path();
        let mut queue = Self::new(store);

        let ids: Vec<BatchId> = match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(ids) => ids,
                Err(e) => {
                    warn!("Ignoring corrupt backlog state {}: {}", path.display(), e);
                    return queue;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No backlog state at {}", path.display());
                return queue;
            }
            Err(e) => {
                warn!("Failed to read backlog state {}: {}", path.display(), e);
                return queue;
            }
        };

        for id in ids {
            if !queue.ids.contains(&id) {
                queue.ids.push_back(id);
            }
        }

        if !queue.is_empty() {
            info!("Restored backlog of {} batches", queue.len());
        }
        queue
    }

    pub fn contains(&self, id: BatchId) -> bool {
        self.ids.contains(&id)
    }

    /// Append `id` unless it is already queued or has no batch file.
    ///
    /// Returns true if the id was appended.
    pub fn admit_if_new(&mut self, id: BatchId) -> bool {
        if self.contains(id) {
            return false;
        }
        if !self.store.exists(id) {
            debug!("Not admitting batch {}: no batch file", id);
            return false;
        }
        self.ids.push_back(id);
        info!("Batch {} added to backlog ({} pending)", id, self.ids.len());
        true
    }

    pub fn peek_oldest(&self) -> Option<BatchId> {
        self.ids.front().copied()
    }

    /// Remove `id` and delete its batch file.
    ///
    /// A missing file still removes the id. If the file exists but cannot be
    /// deleted, neither the queue nor the filesystem changes.
    ///
    /// # Errors
    ///
    /// Returns error if the batch file exists but deletion fails
    pub fn remove(&mut self, id: BatchId) -> Result<Removal> {
        if !self.contains(id) {
            return Ok(Removal::NotQueued);
        }

        let removal = if self.store.delete_batch(id)? {
            Removal::Deleted
        } else {
            warn!("Batch file for {} missing, pruning from backlog", id);
            Removal::Pruned
        };

        self.ids.retain(|&queued| queued != id);
        Ok(removal)
    }

    /// Drop `id` from the queue without touching its batch file.
    ///
    /// For a batch that was delivered but whose file could not be deleted:
    /// it must not be sent again. Returns true if the id was queued.
    pub fn forget(&mut self, id: BatchId) -> bool {
        let before = self.ids.len();
        self.ids.retain(|&queued| queued != id);
        self.ids.len() != before
    }

    /// Replace the state file with the current id list
    ///
    /// # Errors
    ///
    /// Returns error if the state file cannot be written
    pub fn persist(&self) -> Result<()> {
        let bytes = serde_json::to_vec(&self.ids)?;
        write_atomic(&self.store.backlog_path(), &bytes)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Queued ids, oldest first
    pub fn ids(&self) -> impl Iterator<Item = BatchId> + '_ {
        self.ids.iter().copied()
    }

    pub fn store(&self) -> &BatchStore {
        &self.store
    }
}
