//! # Compact Batch Codec
//!
//! Encodes batches into 9-element rows for compact transmission.
//!
//! ## Row layout
//!
//! ```text
//! [utc, lat, lon, alt, sog, cog, fx, hdop, nsat]
//! ```
//!
//! ## Modes
//!
//! | Field | Raw | Scaled |
//! |-------|-----|--------|
//! | utc, fx, nsat | integer | integer |
//! | lat, lon | float | × 1,000,000 |
//! | alt, cog, hdop | float | × 10 |
//! | sog | float | × 100 |
//!
//! Scaled values are rounded to the nearest integer, ties away from zero.
//! Absent fields are `null` in both modes. The producing tracker's
//! identifier, when known, travels as a top-level `"dev"` key next to `"f"`.
//!
//! Decoding never fails as a whole: a row that is not a 9-element array is
//! dropped, and a field that cannot be interpreted becomes absent. Both are
//! logged.

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::warn;

use super::Batch;
use crate::error::{Result, TrackerError};
use crate::gnss::Fix;

/// Number of fields in a compact row
pub const ROW_LEN: usize = 9;

/// Field names in row order
pub const FIELD_ORDER: [&str; ROW_LEN] = ["utc", "lat", "lon", "alt", "sog", "cog", "fx", "hdop", "nsat"];

/// Fixed-point scaling factor per row position (1 = integer field)
pub const SCALE: [f64; ROW_LEN] = [1.0, 1_000_000.0, 1_000_000.0, 10.0, 100.0, 10.0, 1.0, 10.0, 1.0];

const UTC: usize = 0;
const LAT: usize = 1;
const LON: usize = 2;
const ALT: usize = 3;
const SOG: usize = 4;
const COG: usize = 5;
const FX: usize = 6;
const HDOP: usize = 7;
const NSAT: usize = 8;

/// Compact row encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Fields reordered into rows, values unchanged (lossless)
    Raw,
    /// Every field converted to a fixed-point integer
    Scaled,
}

/// Encoding used for batch and single-fix files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireFormat {
    /// Canonical objects: `{"f": [{"utc":..,"lat":..}, ...]}`
    Full,
    /// Compact rows, raw values
    Raw,
    /// Compact rows, scaled integers
    Scaled,
}

impl WireFormat {
    /// Compact mode, or `None` for the canonical object form
    pub fn mode(self) -> Option<Mode> {
        match self {
            WireFormat::Full => None,
            WireFormat::Raw => Some(Mode::Raw),
            WireFormat::Scaled => Some(Mode::Scaled),
        }
    }
}

/// A batch encoded as compact rows: `{"dev": "..", "f": [[...], ...]}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactBatch {
    #[serde(rename = "dev", default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(rename = "f")]
    pub rows: Vec<Value>,
}

/// Encode a batch into compact rows
///
/// # Examples
///
/// ```
/// use gnss_tracker::batch::Batch;
/// use gnss_tracker::batch::codec::{encode, Mode};
/// use gnss_tracker::gnss::Fix;
///
/// let batch = Batch::from(vec![Fix { utc: Some(1756813036), lat: Some(-34.139426), ..Fix::default() }]);
/// let compact = encode(&batch, Mode::Scaled);
/// assert_eq!(compact.rows[0][1], -34139426);
/// ```
pub fn encode(batch: &Batch, mode: Mode) -> CompactBatch {
    let rows = batch
        .fixes
        .iter()
        .map(|fix| Value::Array(encode_row(fix, mode)))
        .collect();

    CompactBatch {
        device: batch.device.clone(),
        rows,
    }
}

fn encode_row(fix: &Fix, mode: Mode) -> Vec<Value> {
    let real = |value: Option<f64>, idx: usize| match mode {
        Mode::Raw => float_value(value),
        Mode::Scaled => int_value(value.and_then(|v| scale(v, SCALE[idx]))),
    };

    vec![
        int_value(fix.utc),
        real(fix.lat, LAT),
        real(fix.lon, LON),
        real(fix.alt, ALT),
        real(fix.sog, SOG),
        real(fix.cog, COG),
        int_value(fix.fx.map(i64::from)),
        real(fix.hdop, HDOP),
        int_value(fix.nsat.map(i64::from)),
    ]
}

/// Convert a value to fixed point, rounding half away from zero
///
/// Returns `None` for non-finite values and for values outside the `i64`
/// range, which would otherwise saturate.
pub fn scale(value: f64, factor: f64) -> Option<i64> {
    let scaled = (value * factor).round();
    if !scaled.is_finite() {
        return None;
    }
    // i64::MAX as f64 rounds up to 2^63, itself out of range
    if scaled.abs() >= i64::MAX as f64 {
        warn!("Value {} does not fit a scaled integer (factor {})", value, factor);
        return None;
    }
    Some(scaled as i64)
}

fn int_value(value: Option<i64>) -> Value {
    value.map_or(Value::Null, Value::from)
}

fn float_value(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map_or(Value::Null, Value::Number)
}

/// Decode compact rows back into a batch
///
/// Raw decoding is the exact inverse of raw encoding. Scaled decoding
/// divides by each field's factor, reconstructing values within half a
/// scaling unit of the original.
pub fn decode(compact: &CompactBatch, mode: Mode) -> Batch {
    let fixes = compact
        .rows
        .iter()
        .enumerate()
        .filter_map(|(index, row)| match row.as_array() {
            Some(fields) if fields.len() == ROW_LEN => Some(decode_row(index, fields, mode)),
            Some(fields) => {
                warn!(
                    "Dropping row {}: expected {} fields, got {}",
                    index,
                    ROW_LEN,
                    fields.len()
                );
                None
            }
            None => {
                warn!("Dropping row {}: not an array", index);
                None
            }
        })
        .collect();

    Batch {
        device: compact.device.clone(),
        fixes,
    }
}

fn decode_row(index: usize, fields: &[Value], mode: Mode) -> Fix {
    let real = |idx: usize| -> Option<f64> {
        match mode {
            Mode::Raw => field_f64(index, idx, &fields[idx]),
            Mode::Scaled => field_i64(index, idx, &fields[idx]).map(|v| v as f64 / SCALE[idx]),
        }
    };

    Fix {
        utc: field_i64(index, UTC, &fields[UTC]),
        lat: real(LAT),
        lon: real(LON),
        alt: real(ALT),
        sog: real(SOG),
        cog: real(COG),
        fx: field_i64(index, FX, &fields[FX]).and_then(|v| narrow(index, FX, v)),
        hdop: real(HDOP),
        nsat: field_i64(index, NSAT, &fields[NSAT]).and_then(|v| narrow(index, NSAT, v)),
    }
}

fn field_i64(row: usize, idx: usize, value: &Value) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Number(n) => n.as_i64().or_else(|| {
            // Tolerate integral floats such as 7.0
            n.as_f64()
                .filter(|f| f.is_finite() && f.fract() == 0.0)
                .map(|f| f as i64)
                .or_else(|| {
                    warn!("Row {}: field '{}' is not an integer: {}", row, FIELD_ORDER[idx], n);
                    None
                })
        }),
        other => {
            warn!("Row {}: field '{}' is not numeric: {}", row, FIELD_ORDER[idx], other);
            None
        }
    }
}

fn field_f64(row: usize, idx: usize, value: &Value) -> Option<f64> {
    match value {
        Value::Null => None,
        Value::Number(n) => n.as_f64(),
        other => {
            warn!("Row {}: field '{}' is not numeric: {}", row, FIELD_ORDER[idx], other);
            None
        }
    }
}

fn narrow<T: TryFrom<i64>>(row: usize, idx: usize, value: i64) -> Option<T> {
    T::try_from(value)
        .map_err(|_| warn!("Row {}: field '{}' out of range: {}", row, FIELD_ORDER[idx], value))
        .ok()
}

/// Serialize a batch into file/wire bytes
///
/// # Errors
///
/// Returns `TrackerError::Json` if serialization fails
pub fn to_wire(batch: &Batch, format: WireFormat) -> Result<Vec<u8>> {
    let bytes = match format.mode() {
        None => serde_json::to_vec(batch)?,
        Some(mode) => serde_json::to_vec(&encode(batch, mode))?,
    };
    Ok(bytes)
}

/// Parse file/wire bytes back into a batch
///
/// Individual bad records are dropped (see [`decode`]); only a payload that
/// is not a JSON object with an `"f"` array is rejected.
///
/// # Errors
///
/// Returns `TrackerError::Json` for invalid JSON, or `TrackerError::Codec`
/// if the payload has the wrong shape
pub fn from_wire(bytes: &[u8], format: WireFormat) -> Result<Batch> {
    let compact: CompactBatch = serde_json::from_slice(bytes).map_err(|e| {
        if e.is_data() {
            TrackerError::Codec(format!("Payload is not a batch: {}", e))
        } else {
            TrackerError::Json(e)
        }
    })?;

    let batch = match format.mode() {
        Some(mode) => decode(&compact, mode),
        None => {
            let CompactBatch { device, rows } = compact;
            let fixes = rows
                .into_iter()
                .enumerate()
                .filter_map(|(index, row)| {
                    serde_json::from_value::<Fix>(row)
                        .map_err(|e| warn!("Dropping record {}: {}", index, e))
                        .ok()
                })
                .collect();
            Batch { device, fixes }
        }
    };

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_fix() -> Fix {
        Fix {
            utc: Some(1_756_813_036),
            lat: Some(-34.139426),
            lon: Some(18.39277),
            alt: Some(78.7),
            sog: Some(0.25),
            cog: Some(57.4),
            fx: Some(1),
            hdop: Some(0.7),
            nsat: Some(18),
        }
    }

    fn sample_batch() -> Batch {
        let mut second = sample_fix();
        second.utc = Some(1_756_813_038);
        second.lat = Some(-34.139511);
        second.sog = Some(12.34);
        Batch::from(vec![sample_fix(), second, Fix::default()])
    }

    #[test]
    fn test_raw_row_order() {
        let compact = encode(&Batch::from(vec![sample_fix()]), Mode::Raw);
        assert_eq!(
            compact.rows[0],
            json!([1_756_813_036i64, -34.139426, 18.39277, 78.7, 0.25, 57.4, 1, 0.7, 18])
        );
    }

    #[test]
    fn test_scaled_row_values() {
        let compact = encode(&Batch::from(vec![sample_fix()]), Mode::Scaled);
        assert_eq!(
            compact.rows[0],
            json!([1_756_813_036i64, -34_139_426, 18_392_770, 787, 25, 574, 1, 7, 18])
        );
    }

    #[test]
    fn test_scaled_rows_are_all_integers() {
        let compact = encode(&sample_batch(), Mode::Scaled);
        for row in &compact.rows {
            for value in row.as_array().unwrap() {
                assert!(value.is_null() || value.is_i64(), "Non-integer value {}", value);
            }
        }
    }

    #[test]
    fn test_absent_fields_encode_as_null() {
        let compact = encode(&Batch::from(vec![Fix::default()]), Mode::Scaled);
        assert_eq!(compact.rows[0], json!([null, null, null, null, null, null, null, null, null]));
    }

    #[test]
    fn test_raw_round_trip_is_exact() {
        let batch = sample_batch();
        assert_eq!(decode(&encode(&batch, Mode::Raw), Mode::Raw), batch);
    }

    #[test]
    fn test_raw_round_trip_through_bytes_is_exact() {
        let mut fix = sample_fix();
        fix.lat = Some(0.1 + 0.2); // not representable in short decimal form
        let batch = Batch::from(vec![fix]);

        let bytes = to_wire(&batch, WireFormat::Raw).unwrap();
        assert_eq!(from_wire(&bytes, WireFormat::Raw).unwrap(), batch);
    }

    #[test]
    fn test_scaled_round_trip_within_half_unit() {
        let batch = Batch::from(vec![Fix {
            utc: Some(42),
            lat: Some(51.477928_4),
            lon: Some(-0.001545_6),
            alt: Some(46.04),
            sog: Some(3.14159),
            cog: Some(359.96),
            fx: Some(2),
            hdop: Some(1.26),
            nsat: Some(11),
        }]);
        let decoded = decode(&encode(&batch, Mode::Scaled), Mode::Scaled);
        let (orig, back) = (&batch.fixes[0], &decoded.fixes[0]);

        let within = |a: Option<f64>, b: Option<f64>, half_unit: f64| {
            (a.unwrap() - b.unwrap()).abs() <= half_unit + 1e-12
        };
        assert_eq!(back.utc, orig.utc);
        assert!(within(orig.lat, back.lat, 0.5e-6));
        assert!(within(orig.lon, back.lon, 0.5e-6));
        assert!(within(orig.alt, back.alt, 0.05));
        assert!(within(orig.sog, back.sog, 0.005));
        assert!(within(orig.cog, back.cog, 0.05));
        assert!(within(orig.hdop, back.hdop, 0.05));
        assert_eq!(back.fx, orig.fx);
        assert_eq!(back.nsat, orig.nsat);
    }

    #[test]
    fn test_scale_rounds_half_away_from_zero() {
        assert_eq!(scale(2.5, 1.0), Some(3));
        assert_eq!(scale(-2.5, 1.0), Some(-3));
        assert_eq!(scale(0.25, 10.0), Some(3));
        assert_eq!(scale(f64::NAN, 10.0), None);
        assert_eq!(scale(f64::INFINITY, 10.0), None);
    }

    #[test]
    fn test_scale_out_of_range_is_absent() {
        assert_eq!(scale(1e30, 1_000_000.0), None);
        assert_eq!(scale(-1e13, 1_000_000.0), None);
        assert_eq!(scale(9.2e12, 1_000_000.0), Some(9_200_000_000_000_000_000));

        let batch = Batch::from(vec![Fix {
            utc: Some(1),
            lat: Some(1e30),
            lon: Some(18.39277),
            ..Fix::default()
        }]);
        let decoded = decode(&encode(&batch, Mode::Scaled), Mode::Scaled);
        assert_eq!(decoded.fixes[0].lat, None);
        assert_eq!(decoded.fixes[0].lon, Some(18.39277));
    }

    #[test]
    fn test_device_survives_every_wire_format() {
        let batch = sample_batch().with_device(Some("pi-04".to_string()));
        for format in [WireFormat::Full, WireFormat::Raw, WireFormat::Scaled] {
            let bytes = to_wire(&batch, format).unwrap();
            let value: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(value["dev"], "pi-04", "{:?}", format);
            assert!(value["f"].is_array());
            assert_eq!(from_wire(&bytes, format).unwrap().device.as_deref(), Some("pi-04"));
        }
    }

    #[test]
    fn test_payload_without_device_decodes() {
        let bytes = br#"{"f":[[1,1000000,2000000,10,100,10,1,10,5]]}"#;
        let batch = from_wire(bytes, WireFormat::Scaled).unwrap();
        assert_eq!(batch.device, None);
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_decode_drops_short_row_keeps_rest() {
        let compact = CompactBatch {
            device: None,
            rows: vec![
                json!([1, 1_000_000, 2_000_000, 10, 100, 10, 1, 10, 5]),
                json!([2, 3]),
                json!("garbage"),
                json!([3, 1_000_000, 2_000_000, 10, 100, 10, 1, 10, 5]),
            ],
        };
        let batch = decode(&compact, Mode::Scaled);
        let utcs: Vec<_> = batch.fixes.iter().map(|f| f.utc).collect();
        assert_eq!(utcs, vec![Some(1), Some(3)]);
        assert_eq!(batch.fixes[0].lat, Some(1.0));
        assert_eq!(batch.fixes[0].sog, Some(1.0));
    }

    #[test]
    fn test_decode_bad_field_becomes_absent() {
        let compact = CompactBatch {
            device: None,
            rows: vec![json!([7, "north", 18.5, 1.5, 0.0, 90.0, 300, 0.9, -1])],
        };
        let fix = decode(&compact, Mode::Raw).fixes[0];
        assert_eq!(fix.utc, Some(7));
        assert_eq!(fix.lat, None);
        assert_eq!(fix.lon, Some(18.5));
        assert_eq!(fix.fx, None, "300 does not fit a fix quality");
        assert_eq!(fix.nsat, None, "negative satellite count");
        assert_eq!(fix.hdop, Some(0.9));
    }

    #[test]
    fn test_decode_tolerates_integral_floats() {
        let compact = CompactBatch {
            device: None,
            rows: vec![json!([7.0, 1, 2, 3, 4, 5, 1.0, 6, 9.0])],
        };
        let fix = decode(&compact, Mode::Scaled).fixes[0];
        assert_eq!(fix.utc, Some(7));
        assert_eq!(fix.fx, Some(1));
        assert_eq!(fix.nsat, Some(9));
    }

    #[test]
    fn test_full_wire_format_is_canonical_objects() {
        let batch = sample_batch();
        let bytes = to_wire(&batch, WireFormat::Full).unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["f"][0]["lat"], json!(-34.139426));
        assert_eq!(from_wire(&bytes, WireFormat::Full).unwrap(), batch);
    }

    #[test]
    fn test_full_wire_format_drops_bad_record() {
        let bytes = br#"{"f": [{"utc": 1}, {"utc": "yesterday"}, {"utc": 3}]}"#;
        let batch = from_wire(bytes, WireFormat::Full).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.id(), Some(3));
    }

    #[test]
    fn test_from_wire_rejects_non_batch() {
        assert!(matches!(
            from_wire(b"[1, 2, 3]", WireFormat::Scaled),
            Err(TrackerError::Codec(_))
        ));
        assert!(matches!(
            from_wire(b"{\"f\": [", WireFormat::Scaled),
            Err(TrackerError::Json(_))
        ));
    }

    #[test]
    fn test_wire_format_mode() {
        assert_eq!(WireFormat::Full.mode(), None);
        assert_eq!(WireFormat::Raw.mode(), Some(Mode::Raw));
        assert_eq!(WireFormat::Scaled.mode(), Some(Mode::Scaled));
    }
}
