//! # Transmission Scheduler
//!
//! Drains the current batch and the backlog within the time left in the
//! current sampling interval.
//!
//! ## Budget
//!
//! Work continues only while `elapsed < 95% × sampling interval`. The last
//! 5% is reserved so retries never delay the next sample. A transport call
//! that hangs is not interrupted and will overrun the budget.
//!
//! ## Ordering
//!
//! - Backlog empty: the current batch is sent first. On failure it joins
//!   the backlog and the backlog rules apply from then on.
//! - Backlog non-empty: the current batch is queued behind older entries
//!   and the oldest entry is attempted first. Entries whose file vanished
//!   are pruned without a transport call.
//!
//! No failure escapes the scheduler: transport and filesystem errors are
//! logged and leave the batch queued for a later cycle.

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::Transport;
use crate::backlog::{BacklogQueue, Removal};
use crate::batch::codec::WireFormat;
use crate::batch::BatchId;
use crate::gnss::Fix;

/// Share of the sampling interval available to transmission, in percent
pub const BUDGET_PERCENT: u32 = 95;

/// Returns true while `elapsed` is strictly below 95% of `interval`.
///
/// # Examples
///
/// ```
/// use gnss_tracker::transmit::scheduler::within_budget;
/// use std::time::Duration;
///
/// let interval = Duration::from_secs(2);
/// assert!(within_budget(Duration::from_millis(1899), interval));
/// assert!(!within_budget(Duration::from_millis(1900), interval));
/// ```
#[must_use]
pub fn within_budget(elapsed: Duration, interval: Duration) -> bool {
    let threshold = interval.as_nanos() * u128::from(BUDGET_PERCENT) / 100;
    elapsed.as_nanos() < threshold
}

/// Time-boxed sender for batches, backlog entries and single fixes.
///
/// Owns the [`BacklogQueue`] and the [`Transport`]; the tracker talks to
/// the backlog only through the scheduler.
#[derive(Debug)]
pub struct Scheduler<T> {
    transport: T,
    backlog: BacklogQueue,
    interval: Duration,
    retry_spacing: Duration,
    format: WireFormat,
    device: Option<String>,
}

impl<T: Transport> Scheduler<T> {
    /// Create a scheduler for a given sampling interval
    ///
    /// Defaults: no pause between failed attempts, scaled wire format for
    /// single-fix files.
    pub fn new(backlog: BacklogQueue, transport: T, interval: Duration) -> Self {
        Self {
            transport,
            backlog,
            interval,
            retry_spacing: Duration::ZERO,
            format: WireFormat::Scaled,
            device: None,
        }
    }

    /// Pause between a failed attempt and the next one within a cycle
    #[must_use]
    pub fn with_retry_spacing(mut self, spacing: Duration) -> Self {
        self.retry_spacing = spacing;
        self
    }

    /// Encoding used for single-fix files
    #[must_use]
    pub fn with_format(mut self, format: WireFormat) -> Self {
        self.format = format;
        self
    }

    /// Tracker identifier written into single-fix files
    #[must_use]
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    pub fn backlog(&self) -> &BacklogQueue {
        &self.backlog
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether the cycle that started at `cycle_start` still has budget
    pub fn time_remains(&self, cycle_start: Instant) -> bool {
        within_budget(cycle_start.elapsed(), self.interval)
    }

    /// Send the batch `current` and work the backlog while time remains.
    ///
    /// Returns true iff the backlog is empty afterwards.
    pub async fn send_batch(&mut self, current: BatchId, cycle_start: Instant) -> bool {
        loop {
            let progressed = if self.backlog.is_empty() {
                if !self.backlog.store().exists(current) {
                    debug!("No batch file for {}, nothing to send", current);
                    break;
                }
                if self.send_current(current).await {
                    break;
                }
                false
            } else {
                if self.backlog.admit_if_new(current) {
                    self.persist();
                }
                match self.backlog.peek_oldest() {
                    Some(oldest) => self.send_oldest(oldest).await,
                    None => continue,
                }
            };

            if !self.continue_after(progressed, cycle_start).await {
                break;
            }
        }

        self.persist();
        self.backlog.is_empty()
    }

    /// Send the latest fix on its own, then work the backlog.
    ///
    /// Used while a backlog is pending and the current batch is not full, so
    /// fresh positions are not held back behind a long backlog. Returns true
    /// iff the backlog is empty afterwards; false if the budget ran out
    /// before the fix was delivered.
    pub async fn send_single(&mut self, fix: &Fix, cycle_start: Instant) -> bool {
        while self.time_remains(cycle_start) {
            let device = self.device.as_deref();
            let path = match self.backlog.store().write_scratch(fix, device, self.format) {
                Ok(path) => path,
                Err(e) => {
                    error!("Failed to write single-fix file: {}", e);
                    return self.backlog.is_empty();
                }
            };

            if self.transport.send(&path).await {
                info!("Sent single fix (utc {:?})", fix.utc);
                self.discard_scratch();
                return self.drain_backlog(cycle_start).await;
            }

            warn!("Single fix send failed");
            if !self.retry_spacing.is_zero() {
                tokio::time::sleep(self.retry_spacing).await;
            }
        }

        warn!("Cycle budget exhausted before the single fix was delivered");
        self.discard_scratch();
        false
    }

    /// Work the backlog from its oldest entry while time remains.
    ///
    /// Returns true iff the backlog is empty afterwards.
    pub async fn drain_backlog(&mut self, cycle_start: Instant) -> bool {
        match self.backlog.peek_oldest() {
            Some(head) => self.send_batch(head, cycle_start).await,
            None => true,
        }
    }

    /// Write the backlog state file, logging any failure.
    pub fn persist(&self) {
        if let Err(e) = self.backlog.persist() {
            error!("Failed to persist backlog: {}", e);
        }
    }

    /// Attempt `current` while the backlog is empty. Returns true on delivery.
    async fn send_current(&mut self, current: BatchId) -> bool {
        let path = self.backlog.store().batch_path(current);

        if self.transport.send(&path).await {
            info!("Batch {} sent", current);
            if let Err(e) = self.backlog.store().delete_batch(current) {
                warn!("Batch {} sent but its file could not be deleted: {}", current, e);
            }
            return true;
        }

        warn!("Batch {} send failed, queuing for retry", current);
        if self.backlog.admit_if_new(current) {
            self.persist();
        }
        false
    }

    /// Attempt (or prune) the oldest backlog entry. Returns true if it left the queue.
    async fn send_oldest(&mut self, oldest: BatchId) -> bool {
        if !self.backlog.store().exists(oldest) {
            return self.remove(oldest);
        }

        let path = self.backlog.store().batch_path(oldest);
        if self.transport.send(&path).await {
            info!("Backlog batch {} sent", oldest);
            if !self.remove(oldest) {
                // Delivered: never resend, even though the file stays behind
                warn!("Batch {} delivered but not deletable, dropping it from the backlog", oldest);
                if self.backlog.forget(oldest) {
                    self.persist();
                }
            }
            true
        } else {
            warn!("Backlog batch {} send failed ({} pending)", oldest, self.backlog.len());
            false
        }
    }

    fn remove(&mut self, id: BatchId) -> bool {
        match self.backlog.remove(id) {
            Ok(Removal::Deleted) | Ok(Removal::Pruned) => {
                self.persist();
                true
            }
            Ok(Removal::NotQueued) => false,
            Err(e) => {
                error!("Failed to remove batch {} from backlog: {}", id, e);
                false
            }
        }
    }

    /// Decide whether to take another pass; pauses first after a failure.
    async fn continue_after(&self, progressed: bool, cycle_start: Instant) -> bool {
        if !self.time_remains(cycle_start) {
            debug!("Cycle budget exhausted ({} pending)", self.backlog.len());
            return false;
        }
        if !progressed && !self.retry_spacing.is_zero() {
            tokio::time::sleep(self.retry_spacing).await;
            return self.time_remains(cycle_start);
        }
        true
    }

    fn discard_scratch(&self) {
        if let Err(e) = self.backlog.store().delete_scratch() {
            warn!("Failed to delete single-fix file: {}", e);
        }
    }
}
