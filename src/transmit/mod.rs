//! # Transmit Module
//!
//! Delivery of batch files and the time-boxed retry scheduler.
//!
//! This module handles:
//! - The [`Transport`] boundary: deliver a file, report success as a bool
//! - Draining the current batch and the backlog within the sampling budget
//! - Sending single fixes while a backlog is pending
//! - Outbox (spool directory) and simulated transports

pub mod outbox;
pub mod scheduler;
pub mod simulated;

use async_trait::async_trait;
use std::path::Path;

/// Channel used to deliver a file to the remote endpoint.
///
/// Returns true iff the endpoint accepted the bytes at `path`. Transports
/// may retry internally but expose only the final outcome; failures are
/// never errors, the scheduler re-queues instead.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, path: &Path) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn send(&mut self, path: &Path) -> bool {
        (**self).send(path).await
    }
}
