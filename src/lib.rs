//! # GNSS Tracker Library
//!
//! Store-and-forward position tracking for field devices with intermittent
//! network connectivity.
//!
//! Positions are sampled at a fixed cadence, grouped into batches, encoded
//! compactly and written to disk before transmission. Batches that fail to
//! send are kept in a durable backlog and retried between samples, oldest
//! first, without ever starving the sampling cadence.

pub mod backlog;
pub mod batch;
pub mod config;
pub mod error;
pub mod gnss;
pub mod tracker;
pub mod transmit;
