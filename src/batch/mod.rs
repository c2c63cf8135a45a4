//! # Batch Module
//!
//! Grouping of consecutive fixes into batches, their wire encoding, and
//! their on-disk layout.
//!
//! This module handles:
//! - Accumulating fixes until the configured batch size is reached
//! - Lossless and fixed-point compact encoding ([`codec`])
//! - Batch files, the single-fix scratch file and the audit trail ([`store`])

pub mod codec;
pub mod store;

use serde::{Deserialize, Serialize};

use crate::gnss::Fix;

/// Batch identifier: epoch seconds of the batch's last fix
pub type BatchId = i64;

/// An ordered group of fixes flushed together for transmission.
///
/// Canonical form: `{"dev": "<tracker id>", "f": [Fix, ...]}`, where `dev`
/// is omitted when the batch carries no device identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    /// Identifier of the tracker that produced the batch
    #[serde(rename = "dev", default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(rename = "f")]
    pub fixes: Vec<Fix>,
}

impl Batch {
    /// Tag the batch with the producing tracker's identifier
    #[must_use]
    pub fn with_device(mut self, device: Option<String>) -> Self {
        self.device = device;
        self
    }

    /// Identifier derived from the last fix, if it carries a timestamp
    #[must_use]
    pub fn id(&self) -> Option<BatchId> {
        self.fixes.last().and_then(|fix| fix.utc)
    }

    pub fn len(&self) -> usize {
        self.fixes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixes.is_empty()
    }
}

impl From<Vec<Fix>> for Batch {
    fn from(fixes: Vec<Fix>) -> Self {
        Self {
            device: None,
            fixes,
        }
    }
}

/// Append a fix to a batch, creating the batch on first use.
///
/// # Examples
///
/// ```
/// use gnss_tracker::batch::append;
/// use gnss_tracker::gnss::Fix;
///
/// let batch = append(None, Fix { utc: Some(100), ..Fix::default() });
/// let batch = append(Some(batch), Fix { utc: Some(102), ..Fix::default() });
/// assert_eq!(batch.len(), 2);
/// assert_eq!(batch.id(), Some(102));
/// ```
#[must_use]
pub fn append(batch: Option<Batch>, fix: Fix) -> Batch {
    let mut batch = batch.unwrap_or_default();
    batch.fixes.push(fix);
    batch
}

/// Collects fixes and releases a full batch every `size` fixes.
#[derive(Debug, Clone)]
pub struct Accumulator {
    size: usize,
    pending: Option<Batch>,
    count: usize,
}

impl Accumulator {
    /// Create an accumulator flushing every `size` fixes (minimum 1)
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            size: size.max(1),
            pending: None,
            count: 0,
        }
    }

    /// Add a fix; returns the completed batch once `size` fixes have accumulated.
    ///
    /// # Examples
    ///
    /// ```
    /// use gnss_tracker::batch::Accumulator;
    /// use gnss_tracker::gnss::Fix;
    ///
    /// let mut acc = Accumulator::new(2);
    /// assert!(acc.push(Fix::default()).is_none());
    /// let batch = acc.push(Fix::default()).unwrap();
    /// assert_eq!(batch.len(), 2);
    /// assert!(acc.is_empty());
    /// ```
    pub fn push(&mut self, fix: Fix) -> Option<Batch> {
        self.pending = Some(append(self.pending.take(), fix));
        self.count += 1;

        if self.count >= self.size {
            self.count = 0;
            self.pending.take()
        } else {
            None
        }
    }

    /// Fixes accumulated since the last flush
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Configured batch size
    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fix_at(utc: i64) -> Fix {
        Fix {
            utc: Some(utc),
            ..Fix::default()
        }
    }

    #[test]
    fn test_append_creates_batch() {
        let batch = append(None, fix_at(1));
        assert_eq!(batch.fixes, vec![fix_at(1)]);
    }

    #[test]
    fn test_append_preserves_order() {
        let mut batch = None;
        for utc in [5, 3, 9] {
            batch = Some(append(batch, fix_at(utc)));
        }
        let utcs: Vec<_> = batch.unwrap().fixes.iter().map(|f| f.utc).collect();
        assert_eq!(utcs, vec![Some(5), Some(3), Some(9)]);
    }

    #[test]
    fn test_batch_id_is_last_utc() {
        let batch = Batch::from(vec![fix_at(100), fix_at(200)]);
        assert_eq!(batch.id(), Some(200));
    }

    #[test]
    fn test_batch_id_without_utc() {
        let batch = Batch::from(vec![fix_at(100), Fix::default()]);
        assert_eq!(batch.id(), None);
        assert_eq!(Batch::default().id(), None);
    }

    #[test]
    fn test_batch_canonical_form() {
        let batch = Batch::from(vec![fix_at(7)]);
        let json = serde_json::to_value(&batch).unwrap();
        assert!(json["f"].is_array());
        assert_eq!(json["f"][0]["utc"], 7);
        assert!(json.get("dev").is_none());
    }

    #[test]
    fn test_batch_device_next_to_fixes() {
        let batch = Batch::from(vec![fix_at(7)]).with_device(Some("pi-04".to_string()));
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["dev"], "pi-04");
        assert_eq!(json["f"][0]["utc"], 7);

        let back: Batch = serde_json::from_value(json).unwrap();
        assert_eq!(back, batch);
    }

    #[test]
    fn test_accumulator_flushes_at_size() {
        let mut acc = Accumulator::new(3);

        assert!(acc.push(fix_at(1)).is_none());
        assert!(acc.push(fix_at(2)).is_none());
        assert_eq!(acc.len(), 2);

        let batch = acc.push(fix_at(3)).expect("third fix completes the batch");
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.id(), Some(3));
        assert!(acc.is_empty());

        // Next batch starts fresh
        assert!(acc.push(fix_at(4)).is_none());
        assert_eq!(acc.len(), 1);
    }

    #[test]
    fn test_accumulator_size_one_flushes_every_fix() {
        let mut acc = Accumulator::new(1);
        assert_eq!(acc.push(fix_at(1)).unwrap().len(), 1);
        assert_eq!(acc.push(fix_at(2)).unwrap().len(), 1);
    }

    #[test]
    fn test_accumulator_zero_size_is_clamped() {
        let acc = Accumulator::new(0);
        assert_eq!(acc.size(), 1);
    }
}
