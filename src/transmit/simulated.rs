//! # Simulated Transport
//!
//! Bench transport for exercising the backlog without a modem. Attempts are
//! numbered from 0; an attempt fails when its number falls inside one of the
//! configured outage windows `[start, end)`. An optional latency is applied
//! to every attempt to mimic a slow uplink.

use async_trait::async_trait;
use std::fs;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::Transport;

/// Transport with scripted outages
#[derive(Debug, Clone, Default)]
pub struct SimulatedTransport {
    outages: Vec<Range<u64>>,
    latency: Duration,
    attempts: u64,
}

impl SimulatedTransport {
    /// Create a transport failing during the given attempt windows
    ///
    /// # Examples
    ///
    /// ```
    /// use gnss_tracker::transmit::simulated::SimulatedTransport;
    /// use std::time::Duration;
    ///
    /// // First five attempts fail, then the link comes up
    /// let transport = SimulatedTransport::new(vec![0..5], Duration::ZERO);
    /// assert!(!transport.is_up(4));
    /// assert!(transport.is_up(5));
    /// ```
    #[must_use]
    pub fn new(outages: Vec<Range<u64>>, latency: Duration) -> Self {
        Self {
            outages,
            latency,
            attempts: 0,
        }
    }

    /// Whether attempt number `attempt` succeeds
    pub fn is_up(&self, attempt: u64) -> bool {
        !self.outages.iter().any(|window| window.contains(&attempt))
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send(&mut self, path: &Path) -> bool {
        let attempt = self.attempts;
        self.attempts += 1;

        let size = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Simulated: cannot read {}: {}", path.display(), e);
                return false;
            }
        };

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if self.is_up(attempt) {
            info!("Simulated: attempt {} delivered {} ({} bytes)", attempt, path.display(), size);
            true
        } else {
            warn!("Simulated: attempt {} failed (link down)", attempt);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[tokio::test]
    async fn test_outage_windows() {
        let file = NamedTempFile::new().unwrap();
        let mut transport = SimulatedTransport::new(vec![0..2, 4..5], Duration::ZERO);

        let mut results = Vec::new();
        for _ in 0..6 {
            results.push(transport.send(file.path()).await);
        }
        assert_eq!(results, vec![false, false, true, true, false, true]);
        assert_eq!(transport.attempts(), 6);
    }

    #[tokio::test]
    async fn test_missing_file_fails_and_counts() {
        let mut transport = SimulatedTransport::default();
        assert!(!transport.send(Path::new("/nonexistent/gnss_1.json")).await);
        assert_eq!(transport.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_applied() {
        let file = NamedTempFile::new().unwrap();
        let mut transport = SimulatedTransport::new(Vec::new(), Duration::from_millis(500));

        let start = tokio::time::Instant::now();
        assert!(transport.send(file.path()).await);
        assert_eq!(start.elapsed(), Duration::from_millis(500));
    }
}
