//! # NMEA 0183 Decoder
//!
//! Decodes RMC and GGA sentences from raw receiver bytes into a [`Fix`].
//!
//! ## Sentence framing
//!
//! ```text
//! $GNRMC,113716.000,A,3408.36553,S,01823.56621,E,0.00,57.43,020925,,,A,V*2A
//! ^ talker+type     fields...                                          ^ XOR checksum
//! ```
//!
//! The checksum is the XOR of every byte between `$` and `*`, written as two
//! hex digits. Sentences failing framing or checksum validation are skipped.
//!
//! ## Field sources
//!
//! | Fix field | Sentence | Blank field |
//! |-----------|----------|-------------|
//! | utc, lat, lon | RMC | absent |
//! | sog, cog | RMC | 0.0 |
//! | fx, nsat | GGA | 0 |
//! | alt, hdop | GGA | 0.0 |

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tracing::debug;

use super::Fix;
use crate::error::{Result, TrackerError};

/// Recommended minimum data (time, date, position, speed, course)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Rmc {
    /// Epoch seconds, present only when both date and time are
    pub utc: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// Speed over ground in knots
    pub sog: Option<f64>,
    /// Course over ground in degrees true
    pub cog: Option<f64>,
}

/// Fix data (quality, satellites, dilution, altitude)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Gga {
    pub quality: u8,
    pub nsat: u32,
    pub hdop: Option<f64>,
    pub alt: Option<f64>,
}

/// A decoded NMEA sentence
#[derive(Debug, Clone, PartialEq)]
pub enum Sentence {
    Rmc(Rmc),
    Gga(Gga),
    /// Valid sentence of a type the tracker does not use (GSA, GSV, VTG, ...)
    Other(String),
}

/// Calculate the NMEA checksum of a sentence body (bytes between `$` and `*`)
///
/// # Examples
///
/// ```
/// use gnss_tracker::gnss::nmea::checksum;
///
/// assert_eq!(checksum("GPTXT,01,01,01,ANTENNA OK"), 0x35);
/// ```
pub fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Decode a single NMEA sentence
///
/// # Arguments
///
/// * `line` - One sentence, with or without trailing CR/LF
///
/// # Returns
///
/// * `Result<Sentence>` - Decoded sentence, or error if invalid
///
/// # Errors
///
/// Returns error if:
/// - The line does not start with `$`
/// - The `*HH` checksum is missing, malformed or does not match
/// - A recognised sentence has an unparseable time, date or coordinate
pub fn parse_sentence(line: &str) -> Result<Sentence> {
    let line = line.trim_end();

    let rest = line
        .strip_prefix('$')
        .ok_or_else(|| TrackerError::Nmea(format!("Missing '$' start: {}", line)))?;

    let (body, received) = rest
        .rsplit_once('*')
        .ok_or_else(|| TrackerError::Nmea(format!("Missing checksum: {}", line)))?;

    let received = u8::from_str_radix(received, 16)
        .map_err(|_| TrackerError::Nmea(format!("Malformed checksum '{}'", received)))?;

    let calculated = checksum(body);
    if calculated != received {
        return Err(TrackerError::Nmea(format!(
            "Checksum mismatch: expected 0x{:02X}, got 0x{:02X}",
            calculated, received
        )));
    }

    let fields: Vec<&str> = body.split(',').collect();
    let address = fields[0];
    if address.len() < 5 || !address.is_ascii() {
        return Err(TrackerError::Nmea(format!("Invalid address field '{}'", address)));
    }

    // Talker prefix (GP, GN, GL, BD, ...) is ignored
    match &address[address.len() - 3..] {
        "RMC" => parse_rmc(&fields).map(Sentence::Rmc),
        "GGA" => parse_gga(&fields).map(Sentence::Gga),
        other => Ok(Sentence::Other(other.to_string())),
    }
}

/// Build a [`Fix`] from a buffer of raw receiver bytes
///
/// Keeps the latest valid RMC and GGA sentences found in the buffer. Lines
/// that are not sentences or fail validation are skipped. A buffer without
/// any usable sentence yields a [`Fix`] with every field absent.
///
/// # Examples
///
/// ```
/// use gnss_tracker::gnss::nmea::fix_from_buffer;
///
/// let bytes = b"$GNGGA,113715.000,3408.36553,S,01823.56620,E,1,18,0.7,78.7,M,30.8,M,,*64\r\n";
/// let fix = fix_from_buffer(bytes);
/// assert_eq!(fix.fx, Some(1));
/// assert_eq!(fix.nsat, Some(18));
/// assert_eq!(fix.utc, None); // no RMC in buffer
/// ```
pub fn fix_from_buffer(bytes: &[u8]) -> Fix {
    let text: String = bytes
        .iter()
        .map(|&b| b as char)
        .filter(|&c| c != '\0')
        .collect();

    let mut rmc = None;
    let mut gga = None;

    for line in text.lines() {
        if !line.starts_with('$') {
            continue;
        }
        match parse_sentence(line) {
            Ok(Sentence::Rmc(s)) => rmc = Some(s),
            Ok(Sentence::Gga(s)) => gga = Some(s),
            Ok(Sentence::Other(_)) => {}
            Err(e) => debug!("Skipping sentence: {}", e),
        }
    }

    let mut fix = Fix::default();

    if let Some(rmc) = rmc {
        fix.utc = rmc.utc;
        fix.lat = rmc.lat.map(|v| round_to(v, 6));
        fix.lon = rmc.lon.map(|v| round_to(v, 6));
        fix.sog = rmc.sog.map(|v| round_to(v, 2));
        fix.cog = rmc.cog.map(|v| round_to(v, 1));
    }

    if let Some(gga) = gga {
        fix.fx = Some(gga.quality);
        fix.nsat = Some(gga.nsat);
        fix.alt = gga.alt.map(|v| round_to(v, 1));
        fix.hdop = gga.hdop.map(|v| round_to(v, 1));
    }

    fix
}

/// Round to a number of decimal places
pub fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn parse_rmc(fields: &[&str]) -> Result<Rmc> {
    if fields.len() < 10 {
        return Err(TrackerError::Nmea(format!(
            "RMC too short: {} fields",
            fields.len()
        )));
    }

    let time = parse_time(fields[1])?;
    let date = parse_date(fields[9])?;
    let utc = match (date, time) {
        (Some(d), Some(t)) => Some(NaiveDateTime::new(d, t).and_utc().timestamp()),
        _ => None,
    };

    Ok(Rmc {
        utc,
        lat: parse_coordinate(fields[3], fields[4], 'S')?,
        lon: parse_coordinate(fields[5], fields[6], 'W')?,
        sog: blank_or(fields[7], 0.0),
        cog: blank_or(fields[8], 0.0),
    })
}

fn parse_gga(fields: &[&str]) -> Result<Gga> {
    if fields.len() < 10 {
        return Err(TrackerError::Nmea(format!(
            "GGA too short: {} fields",
            fields.len()
        )));
    }

    Ok(Gga {
        quality: blank_or(fields[6], 0).unwrap_or(0),
        nsat: blank_or(fields[7], 0).unwrap_or(0),
        hdop: blank_or(fields[8], 0.0),
        alt: blank_or(fields[9], 0.0),
    })
}

/// Parse a numeric field, substituting `default` when blank; `None` if unparseable.
fn blank_or<T: std::str::FromStr>(field: &str, default: T) -> Option<T> {
    if field.is_empty() {
        Some(default)
    } else {
        field.parse().ok()
    }
}

/// `hhmmss.sss`
fn parse_time(field: &str) -> Result<Option<NaiveTime>> {
    if field.is_empty() {
        return Ok(None);
    }
    NaiveTime::parse_from_str(field, "%H%M%S%.f")
        .map(Some)
        .map_err(|e| TrackerError::Nmea(format!("Invalid time '{}': {}", field, e)))
}

/// `ddmmyy`, two-digit years are 20yy
fn parse_date(field: &str) -> Result<Option<NaiveDate>> {
    if field.is_empty() {
        return Ok(None);
    }
    let invalid = || TrackerError::Nmea(format!("Invalid date '{}'", field));
    if field.len() != 6 || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let day: u32 = field[0..2].parse().map_err(|_| invalid())?;
    let month: u32 = field[2..4].parse().map_err(|_| invalid())?;
    let year: i32 = field[4..6].parse().map_err(|_| invalid())?;
    NaiveDate::from_ymd_opt(2000 + year, month, day)
        .map(Some)
        .ok_or_else(invalid)
}

/// `(d)ddmm.mmmm` plus hemisphere into signed decimal degrees
fn parse_coordinate(value: &str, hemisphere: &str, negative: char) -> Result<Option<f64>> {
    if value.is_empty() {
        return Ok(None);
    }
    let raw: f64 = value
        .parse()
        .map_err(|_| TrackerError::Nmea(format!("Invalid coordinate '{}'", value)))?;

    let degrees = (raw / 100.0).trunc();
    let minutes = raw - degrees * 100.0;
    let decimal = degrees + minutes / 60.0;

    let sign = match hemisphere.chars().next() {
        Some(h) if h == negative => -1.0,
        Some('N') | Some('S') | Some('E') | Some('W') => 1.0,
        _ => {
            return Err(TrackerError::Nmea(format!(
                "Invalid hemisphere '{}'",
                hemisphere
            )))
        }
    };

    Ok(Some(sign * decimal))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One receiver burst captured from a DFRobot GNSS module
    const CAPTURE: &str = "$GNGGA,113715.000,3408.36553,S,01823.56620,E,1,18,0.7,78.7,M,30.8,M,,*64\r\n\
        $GNGLL,3408.36553,S,01823.56620,E,113715.000,A,A*5C\r\n\
        $GNGSA,A,3,01,02,03,07,08,14,17,19,22,30,,,1.5,0.7,1.3,1*37\r\n\
        $GPGSV,3,1,12,01,65,107,21,02,38,135,21,03,20,055,35,06,07,330,,0*68\r\n\
        $GNRMC,113716.000,A,3408.36553,S,01823.56621,E,0.00,57.43,020925,,,A,V*2A\r\n\
        $GNVTG,57.43,T,,M,0.00,N,0.00,K,A*16\r\n\
        $GNZDA,113716.000,02,09,2025,00,00*45\r\n\
        $GPTXT,01,01,01,ANTENNA OK*35\r\n";

    fn sentence(body: &str) -> String {
        format!("${}*{:02X}", body, checksum(body))
    }

    #[test]
    fn test_checksum_known_sentences() {
        assert_eq!(checksum("GNVTG,57.43,T,,M,0.00,N,0.00,K,A"), 0x16);
        assert_eq!(checksum("GNZDA,113716.000,02,09,2025,00,00"), 0x45);
    }

    #[test]
    fn test_parse_gga() {
        let result = parse_sentence(
            "$GNGGA,113715.000,3408.36553,S,01823.56620,E,1,18,0.7,78.7,M,30.8,M,,*64",
        );
        assert!(result.is_ok(), "Parse failed: {:?}", result.err());

        match result.unwrap() {
            Sentence::Gga(gga) => {
                assert_eq!(gga.quality, 1);
                assert_eq!(gga.nsat, 18);
                assert_eq!(gga.hdop, Some(0.7));
                assert_eq!(gga.alt, Some(78.7));
            }
            other => panic!("Expected GGA, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rmc() {
        let result = parse_sentence(
            "$GNRMC,113716.000,A,3408.36553,S,01823.56621,E,0.00,57.43,020925,,,A,V*2A\r\n",
        );

        match result.unwrap() {
            Sentence::Rmc(rmc) => {
                assert_eq!(rmc.utc, Some(1_756_813_036));
                assert!((rmc.lat.unwrap() - (-34.1394255)).abs() < 1e-9);
                assert!((rmc.lon.unwrap() - 18.392770166).abs() < 1e-8);
                assert_eq!(rmc.sog, Some(0.0));
                assert_eq!(rmc.cog, Some(57.43));
            }
            other => panic!("Expected RMC, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_other_sentence_type() {
        let result = parse_sentence("$GPTXT,01,01,01,ANTENNA OK*35");
        assert_eq!(result.unwrap(), Sentence::Other("TXT".to_string()));
    }

    #[test]
    fn test_parse_missing_dollar() {
        assert!(parse_sentence("GPTXT,01,01,01,ANTENNA OK*35").is_err());
    }

    #[test]
    fn test_parse_missing_checksum() {
        assert!(parse_sentence("$GPTXT,01,01,01,ANTENNA OK").is_err());
    }

    #[test]
    fn test_parse_checksum_mismatch() {
        let result = parse_sentence("$GPTXT,01,01,01,ANTENNA OK*36");
        match result {
            Err(TrackerError::Nmea(msg)) => assert!(msg.contains("Checksum mismatch")),
            other => panic!("Expected checksum error, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rmc_northern_western_hemisphere() {
        let line = sentence("GPRMC,080000.00,A,4916.45000,N,12311.12000,W,5.5,90.0,150124,,,A");
        match parse_sentence(&line).unwrap() {
            Sentence::Rmc(rmc) => {
                assert!((rmc.lat.unwrap() - 49.274166).abs() < 1e-5);
                assert!((rmc.lon.unwrap() - (-123.185333)).abs() < 1e-5);
                assert_eq!(rmc.sog, Some(5.5));
            }
            other => panic!("Expected RMC, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rmc_blank_speed_course_default_to_zero() {
        let line = sentence("GPRMC,080000.00,A,4916.45000,N,12311.12000,W,,,150124,,,A");
        match parse_sentence(&line).unwrap() {
            Sentence::Rmc(rmc) => {
                assert_eq!(rmc.sog, Some(0.0));
                assert_eq!(rmc.cog, Some(0.0));
            }
            other => panic!("Expected RMC, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rmc_without_date_has_no_utc() {
        let line = sentence("GPRMC,080000.00,V,,,,,,,,,,N");
        match parse_sentence(&line).unwrap() {
            Sentence::Rmc(rmc) => {
                assert_eq!(rmc.utc, None);
                assert_eq!(rmc.lat, None);
                assert_eq!(rmc.lon, None);
            }
            other => panic!("Expected RMC, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_gga_blank_fields() {
        let line = sentence("GPGGA,080000.00,,,,,,,,,M,,M,,");
        match parse_sentence(&line).unwrap() {
            Sentence::Gga(gga) => {
                assert_eq!(gga.quality, 0);
                assert_eq!(gga.nsat, 0);
                assert_eq!(gga.hdop, Some(0.0));
                assert_eq!(gga.alt, Some(0.0));
            }
            other => panic!("Expected GGA, got: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rmc_invalid_hemisphere() {
        let line = sentence("GPRMC,080000.00,A,4916.45000,Q,12311.12000,W,5.5,90.0,150124,,,A");
        assert!(parse_sentence(&line).is_err());
    }

    #[test]
    fn test_fix_from_capture() {
        let fix = fix_from_buffer(CAPTURE.as_bytes());

        assert_eq!(fix.utc, Some(1_756_813_036));
        assert!((fix.lat.unwrap() - (-34.139426)).abs() < 1.5e-6);
        assert!((fix.lon.unwrap() - 18.39277).abs() < 1e-9);
        assert_eq!(fix.alt, Some(78.7));
        assert_eq!(fix.sog, Some(0.0));
        assert_eq!(fix.cog, Some(57.4));
        assert_eq!(fix.fx, Some(1));
        assert_eq!(fix.hdop, Some(0.7));
        assert_eq!(fix.nsat, Some(18));
        assert!(fix.has_lock());
    }

    #[test]
    fn test_fix_from_empty_buffer() {
        assert_eq!(fix_from_buffer(&[]), Fix::default());
    }

    #[test]
    fn test_fix_from_buffer_drops_nul_bytes() {
        let mut bytes = vec![0u8; 4];
        bytes.extend_from_slice(CAPTURE.as_bytes());
        bytes.extend_from_slice(&[0u8; 4]);
        let fix = fix_from_buffer(&bytes);
        assert_eq!(fix.utc, Some(1_756_813_036));
    }

    #[test]
    fn test_fix_from_buffer_keeps_latest_sentences() {
        let buffer = format!(
            "{}\r\n{}\r\n{}\r\n",
            sentence("GPGGA,080000.00,4916.45,N,12311.12,W,1,05,1.2,10.0,M,,M,,"),
            sentence("GPGGA,080001.00,4916.45,N,12311.12,W,2,09,0.9,12.5,M,,M,,"),
            "$GPGGA,corrupted*00",
        );
        let fix = fix_from_buffer(buffer.as_bytes());
        assert_eq!(fix.fx, Some(2));
        assert_eq!(fix.nsat, Some(9));
        assert_eq!(fix.alt, Some(12.5));
    }

    #[test]
    fn test_fix_from_buffer_skips_partial_lines() {
        // Receiver buffers often start mid-sentence
        let buffer = format!("36553,S,01823.5*1F\r\n{}", CAPTURE);
        let fix = fix_from_buffer(buffer.as_bytes());
        assert_eq!(fix.nsat, Some(18));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(57.43, 1), 57.4);
        assert_eq!(round_to(0.0049, 2), 0.0);
        assert_eq!(round_to(-12.3456789, 6), -12.345679);
    }
}
