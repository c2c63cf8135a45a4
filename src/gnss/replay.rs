//! # NMEA Replay Source
//!
//! Replays a recorded NMEA capture, one receiver burst per read. Bursts are
//! separated by blank lines; the capture wraps around when exhausted.

use async_trait::async_trait;
use std::fs;
use std::path::Path;
use tracing::info;

use super::{nmea, Fix, PositionSource};
use crate::error::{Result, TrackerError};

/// Position source backed by a recorded NMEA capture
#[derive(Debug, Clone)]
pub struct NmeaReplay {
    bursts: Vec<String>,
    next: usize,
}

impl NmeaReplay {
    /// Load a capture file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or contains no sentences
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(&path)?;
        let replay = Self::from_capture(&contents)?;
        info!(
            "Loaded {} NMEA bursts from {}",
            replay.len(),
            path.as_ref().display()
        );
        Ok(replay)
    }

    /// Split capture text into bursts
    ///
    /// # Errors
    ///
    /// Returns `TrackerError::Nmea` if the capture holds no lines
    pub fn from_capture(capture: &str) -> Result<Self> {
        let mut bursts = Vec::new();
        let mut current = String::new();

        for line in capture.lines() {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    bursts.push(std::mem::take(&mut current));
                }
            } else {
                current.push_str(line);
                current.push_str("\r\n");
            }
        }
        if !current.is_empty() {
            bursts.push(current);
        }

        if bursts.is_empty() {
            return Err(TrackerError::Nmea("Replay capture is empty".to_string()));
        }

        Ok(Self { bursts, next: 0 })
    }

    /// Number of bursts in the capture
    pub fn len(&self) -> usize {
        self.bursts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bursts.is_empty()
    }
}

#[async_trait]
impl PositionSource for NmeaReplay {
    async fn read_fix(&mut self) -> Result<Fix> {
        let burst = &self.bursts[self.next];
        self.next = (self.next + 1) % self.bursts.len();
        Ok(nmea::fix_from_buffer(burst.as_bytes()))
    }
}
