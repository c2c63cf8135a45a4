//! # Tracker
//!
//! One iteration of the sampling loop: acquire a fix, record it, accumulate
//! it and hand the result to the scheduler.
//!
//! ## Cycle
//!
//! 1. Start the cycle clock and read a [`Fix`] from the position source
//! 2. Append the fix to the audit trail
//! 3. Push the fix into the [`Accumulator`]
//!    - Batch full: write the batch file, then [`Scheduler::send_batch`]
//!    - Batch not full, backlog pending: [`Scheduler::send_single`]
//!
//! The caller waits until `cycle_start + sampling interval` before running
//! the next cycle. The receiver's read window is part of the cycle, so
//! cycles start exactly one interval apart and the transmission budget
//! counts the time spent acquiring.

use chrono::Utc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::backlog::BacklogQueue;
use crate::batch::codec::WireFormat;
use crate::batch::store::BatchStore;
use crate::batch::{Accumulator, Batch, BatchId};
use crate::config::Config;
use crate::error::Result;
use crate::gnss::{Fix, PositionSource};
use crate::transmit::scheduler::Scheduler;
use crate::transmit::Transport;

/// Sampling loop driver
#[derive(Debug)]
pub struct Tracker<S, T> {
    source: S,
    store: BatchStore,
    accumulator: Accumulator,
    scheduler: Scheduler<T>,
    format: WireFormat,
    device: Option<String>,
    backlog_pending: bool,
}

impl<S: PositionSource, T: Transport> Tracker<S, T> {
    /// Create a tracker, restoring the backlog persisted under `store`
    ///
    /// A non-empty restored backlog puts the tracker in the pending state,
    /// so draining resumes on the first cycle.
    pub fn new(source: S, transport: T, store: BatchStore, batch_size: usize, interval: Duration) -> Self {
        let backlog = BacklogQueue::load(store.clone());
        let backlog_pending = !backlog.is_empty();

        Self {
            source,
            store,
            accumulator: Accumulator::new(batch_size),
            scheduler: Scheduler::new(backlog, transport, interval),
            format: WireFormat::Scaled,
            device: None,
            backlog_pending,
        }
    }

    /// Create a tracker from the loaded configuration
    ///
    /// # Errors
    ///
    /// Returns error if the log directory cannot be created
    pub fn from_config(config: &Config, source: S, transport: T) -> Result<Self> {
        let store = BatchStore::open(&config.storage.log_dir)?;
        Ok(Self::new(source, transport, store, config.batch.size, config.sample_interval())
            .with_format(config.batch.encoding)
            .with_retry_spacing(config.retry_spacing())
            .with_device(config.tracker.id.clone()))
    }

    /// Encoding for batch and single-fix files
    #[must_use]
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self.scheduler = self.scheduler.with_format(format);
        self
    }

    /// Pause between failed send attempts within a cycle
    #[must_use]
    pub fn with_retry_spacing(mut self, spacing: Duration) -> Self {
        self.scheduler = self.scheduler.with_retry_spacing(spacing);
        self
    }

    /// Identify this tracker in every batch and single-fix file
    #[must_use]
    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        let device = device.into();
        self.scheduler = self.scheduler.with_device(Some(device.clone()));
        self.device = Some(device);
        self
    }

    pub fn backlog(&self) -> &BacklogQueue {
        self.scheduler.backlog()
    }

    pub fn accumulator(&self) -> &Accumulator {
        &self.accumulator
    }

    /// Whether the last transmission left batches queued
    pub fn is_backlog_pending(&self) -> bool {
        self.backlog_pending
    }

    /// Run one sampling cycle
    ///
    /// # Returns
    ///
    /// * `Result<Instant>` - When the cycle started (before acquisition)
    ///
    /// # Errors
    ///
    /// Returns error only if the position source fails. Transmission and
    /// storage failures are logged and leave batches queued.
    pub async fn run_cycle(&mut self) -> Result<Instant> {
        let cycle_start = Instant::now();
        let fix = self.source.read_fix().await?;

        if !fix.has_lock() {
            warn!("No satellite lock ({} satellites)", fix.satellites().unwrap_or(0));
        }

        if let Err(e) = self.store.append_audit(&fix) {
            warn!("Failed to append fix to audit trail: {}", e);
        }

        match self.accumulator.push(fix) {
            Some(batch) => {
                let id = self.flush(batch);
                self.backlog_pending = !self.scheduler.send_batch(id, cycle_start).await;
            }
            None if self.backlog_pending => {
                self.backlog_pending = !self.send_position(&fix, cycle_start).await;
            }
            None => {
                debug!(
                    "Accumulated {}/{} fixes",
                    self.accumulator.len(),
                    self.accumulator.size()
                );
            }
        }

        if self.backlog_pending {
            debug!("{} batches pending", self.backlog().len());
        }
        Ok(cycle_start)
    }

    /// Write the backlog state, e.g. before shutdown
    pub fn shutdown(&self) {
        info!("Persisting backlog of {} batches", self.backlog().len());
        self.scheduler.persist();
    }

    /// Write `batch` to its file and return its id
    fn flush(&self, batch: Batch) -> BatchId {
        let preferred = batch.id().unwrap_or_else(|| {
            warn!("Batch has no timestamp, using wall clock for its id");
            Utc::now().timestamp()
        });
        let id = self.store.allocate_id(preferred);
        let batch = batch.with_device(self.device.clone());

        match self.store.write_batch(id, &batch, self.format) {
            Ok(path) => info!("Batch {} written to {}", id, path.display()),
            Err(e) => error!("Failed to write batch {}: {}", id, e),
        }
        id
    }

    async fn send_position(&mut self, fix: &Fix, cycle_start: Instant) -> bool {
        debug!("Backlog pending, sending latest position on its own");
        self.scheduler.send_single(fix, cycle_start).await
    }
}
