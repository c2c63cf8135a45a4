//! # GNSS Module
//!
//! Position samples and the sources that produce them.
//!
//! This module handles:
//! - The [`Fix`] sample type shared by the whole pipeline
//! - The [`PositionSource`] boundary consumed by the tracker
//! - NMEA 0183 parsing of RMC/GGA sentences into a [`Fix`]
//! - Reading a GNSS receiver over a serial UART
//! - Replaying recorded NMEA captures for bench testing

pub mod nmea;
pub mod replay;
pub mod serial;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One position sample with quality metadata.
///
/// Every field is optional: a receiver without satellite lock, or a sentence
/// with blank fields, yields absent values rather than zeros. Serialized as a
/// flat JSON object (`{"utc":..,"lat":..,...}`), with absent fields as `null`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    /// Epoch seconds (UTC)
    pub utc: Option<i64>,
    /// Latitude in decimal degrees, 6 dp, south negative
    pub lat: Option<f64>,
    /// Longitude in decimal degrees, 6 dp, west negative
    pub lon: Option<f64>,
    /// Altitude above mean sea level in meters, 1 dp
    pub alt: Option<f64>,
    /// Speed over ground in knots, 2 dp
    pub sog: Option<f64>,
    /// Course over ground in degrees, 1 dp
    pub cog: Option<f64>,
    /// GGA fix quality (0 = no fix, 1 = GPS, 2 = DGPS, 4/5 = RTK)
    pub fx: Option<u8>,
    /// Horizontal dilution of precision, 1 dp
    pub hdop: Option<f64>,
    /// Satellites used in the solution
    pub nsat: Option<u32>,
}

impl Fix {
    /// Returns true when the receiver reports a usable fix (`fx` present and non-zero).
    ///
    /// # Examples
    ///
    /// ```
    /// use gnss_tracker::gnss::Fix;
    ///
    /// let fix = Fix { fx: Some(1), nsat: Some(7), ..Fix::default() };
    /// assert!(fix.has_lock());
    /// assert!(!Fix::default().has_lock());
    /// ```
    #[must_use]
    pub fn has_lock(&self) -> bool {
        matches!(self.fx, Some(q) if q != 0)
    }

    /// Number of satellites in use, if the receiver reported it.
    #[must_use]
    pub fn satellites(&self) -> Option<u32> {
        self.nsat
    }
}

/// Producer of position samples.
///
/// Implementations must never block indefinitely: a read collects whatever
/// the receiver has buffered within a bounded window and returns an empty
/// [`Fix`] when nothing usable arrived. Errors are reserved for a source that
/// is gone (e.g. the serial device disappeared).
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PositionSource: Send {
    /// Acquire the latest available position sample.
    async fn read_fix(&mut self) -> Result<Fix>;
}

#[async_trait]
impl<S: PositionSource + ?Sized> PositionSource for Box<S> {
    async fn read_fix(&mut self) -> Result<Fix> {
        (**self).read_fix().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_lock_fix_quality_zero() {
        let fix = Fix { fx: Some(0), nsat: Some(5), ..Fix::default() };
        assert!(!fix.has_lock());
        assert_eq!(fix.satellites(), Some(5));
    }

    #[test]
    fn test_has_lock_fix_quality_nonzero() {
        let fix = Fix { fx: Some(1), nsat: Some(7), ..Fix::default() };
        assert!(fix.has_lock());
        assert_eq!(fix.satellites(), Some(7));
    }

    #[test]
    fn test_has_lock_missing_fx() {
        let fix = Fix { nsat: Some(4), ..Fix::default() };
        assert!(!fix.has_lock());
        assert_eq!(fix.satellites(), Some(4));
    }

    #[test]
    fn test_has_lock_missing_nsat() {
        let fix = Fix { fx: Some(2), ..Fix::default() };
        assert!(fix.has_lock());
        assert_eq!(fix.satellites(), None);
    }

    #[test]
    fn test_fix_serializes_absent_fields_as_null() {
        let json = serde_json::to_string(&Fix::default()).unwrap();
        assert_eq!(
            json,
            r#"{"utc":null,"lat":null,"lon":null,"alt":null,"sog":null,"cog":null,"fx":null,"hdop":null,"nsat":null}"#
        );
    }

    #[test]
    fn test_fix_deserializes_missing_fields_as_none() {
        let fix: Fix = serde_json::from_str(r#"{"utc": 1756813036, "lat": -34.139426}"#).unwrap();
        assert_eq!(fix.utc, Some(1756813036));
        assert_eq!(fix.lat, Some(-34.139426));
        assert_eq!(fix.lon, None);
        assert_eq!(fix.nsat, None);
    }
}
