//! The text telemetry grammar.
//!
//! The sensor node emits one reading per notification frame as a
//! newline-terminated UTF-8 line:
//!
//! ```text
//! T:22.15,H:52.15,L:41.00
//! ```
//!
//! Temperature and humidity carry at least one fractional digit; light
//! intensity may be a bare integer. Fields are disjoint substrings and
//! are extracted independently, so any subset may appear and order does
//! not matter. A frame with none of the three patterns (for example a
//! diagnostic line printed by the node) parses to an all-absent reading
//! rather than an error.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Decode a raw notification frame into a trimmed text line.
///
/// Malformed UTF-8 yields a [`DecodeError`]; callers drop the frame and
/// continue. Leading/trailing whitespace, including the terminating
/// newline, is removed.
pub fn decode_frame(bytes: &[u8]) -> Result<String, DecodeError> {
    let text = std::str::from_utf8(bytes)?;
    Ok(text.trim().to_string())
}

/// A partial telemetry reading extracted from one frame.
///
/// Absent fields mean the frame did not carry that value; downstream
/// aggregates keep their last known value for absent fields (see
/// [`TelemetryReading::merge`]) rather than resetting them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TelemetryReading {
    /// Temperature in degrees Celsius.
    pub temperature: Option<f64>,
    /// Relative humidity in percent.
    pub humidity: Option<f64>,
    /// Light intensity in percent.
    pub light: Option<f64>,
}

impl TelemetryReading {
    /// Extract telemetry fields from a decoded text line.
    ///
    /// This never fails: unmatched fields are simply absent, and a
    /// matched span that does not convert to a float (which the span
    /// scanner should already rule out) is treated as absent too.
    pub fn parse(text: &str) -> Self {
        Self {
            temperature: extract_field(text, "T:", true),
            humidity: extract_field(text, "H:", true),
            light: extract_field(text, "L:", false),
        }
    }

    /// Whether no field was present in the frame.
    pub fn is_empty(&self) -> bool {
        self.temperature.is_none() && self.humidity.is_none() && self.light.is_none()
    }

    /// Fold `update` into this reading with last-known-value semantics:
    /// fields absent from the update are left untouched.
    pub fn merge(&mut self, update: &TelemetryReading) {
        if update.temperature.is_some() {
            self.temperature = update.temperature;
        }
        if update.humidity.is_some() {
            self.humidity = update.humidity;
        }
        if update.light.is_some() {
            self.light = update.light;
        }
    }
}

impl fmt::Display for TelemetryReading {
    /// Canonical frame text: present fields in `T,H,L` order at two
    /// decimal places, matching what the node itself emits.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        if let Some(t) = self.temperature {
            write!(f, "T:{t:.2}")?;
            first = false;
        }
        if let Some(h) = self.humidity {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "H:{h:.2}")?;
            first = false;
        }
        if let Some(l) = self.light {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "L:{l:.2}")?;
        }
        Ok(())
    }
}

/// Scan `text` for `tag` followed by a decimal number and parse it.
///
/// Occurrences of the tag that are not followed by a well-formed number
/// are skipped, and the scan continues at the next occurrence.
fn extract_field(text: &str, tag: &str, fraction_required: bool) -> Option<f64> {
    let mut search = text;
    while let Some(pos) = search.find(tag) {
        let rest = &search[pos + tag.len()..];
        if let Some(span) = number_span(rest, fraction_required)
            && let Ok(value) = f64::from_str(span)
        {
            return Some(value);
        }
        search = &search[pos + tag.len()..];
    }
    None
}

/// The longest prefix of `text` matching `\d+\.\d+` (or `\d+(\.\d+)?`
/// when `fraction_required` is false). A trailing bare dot is never
/// consumed.
fn number_span(text: &str, fraction_required: bool) -> Option<&str> {
    let bytes = text.as_bytes();
    let mut int_end = 0;
    while int_end < bytes.len() && bytes[int_end].is_ascii_digit() {
        int_end += 1;
    }
    if int_end == 0 {
        return None;
    }
    if int_end < bytes.len() && bytes[int_end] == b'.' {
        let mut frac_end = int_end + 1;
        while frac_end < bytes.len() && bytes[frac_end].is_ascii_digit() {
            frac_end += 1;
        }
        if frac_end > int_end + 1 {
            return Some(&text[..frac_end]);
        }
    }
    if fraction_required {
        None
    } else {
        Some(&text[..int_end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_frame() {
        let reading = TelemetryReading::parse("T:22.15,H:52.15,L:41.00");
        assert_eq!(reading.temperature, Some(22.15));
        assert_eq!(reading.humidity, Some(52.15));
        assert_eq!(reading.light, Some(41.00));
    }

    #[test]
    fn test_decode_trims_trailing_newline() {
        let text = decode_frame(b"T:22.15,H:52.15,L:41.00\n").unwrap();
        assert_eq!(text, "T:22.15,H:52.15,L:41.00");
        let reading = TelemetryReading::parse(&text);
        assert_eq!(reading.temperature, Some(22.15));
        assert_eq!(reading.humidity, Some(52.15));
        assert_eq!(reading.light, Some(41.00));
    }

    #[test]
    fn test_decode_rejects_malformed_utf8() {
        let result = decode_frame(&[0x54, 0x3a, 0xff, 0xfe]);
        assert!(matches!(result, Err(DecodeError::InvalidUtf8(_))));
    }

    #[test]
    fn test_parse_fields_independently() {
        let reading = TelemetryReading::parse("H:48.20");
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.humidity, Some(48.20));
        assert_eq!(reading.light, None);
    }

    #[test]
    fn test_parse_field_order_does_not_matter() {
        let reading = TelemetryReading::parse("L:12.5,T:20.00");
        assert_eq!(reading.temperature, Some(20.0));
        assert_eq!(reading.light, Some(12.5));
    }

    #[test]
    fn test_parse_diagnostic_line_is_all_absent() {
        let reading = TelemetryReading::parse("waiting for sensor warmup...");
        assert!(reading.is_empty());
    }

    #[test]
    fn test_light_accepts_bare_integer() {
        let reading = TelemetryReading::parse("L:41");
        assert_eq!(reading.light, Some(41.0));
    }

    #[test]
    fn test_temperature_requires_fraction() {
        // T:22 does not match \d+\.\d+, but the light field still may.
        let reading = TelemetryReading::parse("T:22,L:3.");
        assert_eq!(reading.temperature, None);
        assert_eq!(reading.light, Some(3.0));
    }

    #[test]
    fn test_malformed_tag_skipped_for_later_occurrence() {
        let reading = TelemetryReading::parse("T:x T:19.50");
        assert_eq!(reading.temperature, Some(19.50));
    }

    #[test]
    fn test_merge_is_sticky() {
        let mut latest = TelemetryReading::parse("T:22.15,H:52.15,L:41.00");
        latest.merge(&TelemetryReading::parse("H:60.00"));
        assert_eq!(latest.temperature, Some(22.15));
        assert_eq!(latest.humidity, Some(60.00));
        assert_eq!(latest.light, Some(41.00));
    }

    #[test]
    fn test_merge_empty_update_is_noop() {
        let mut latest = TelemetryReading::parse("T:22.15,H:52.15,L:41.00");
        let before = latest;
        latest.merge(&TelemetryReading::default());
        assert_eq!(latest, before);
    }

    #[test]
    fn test_display_round_trip() {
        let reading = TelemetryReading {
            temperature: Some(22.15),
            humidity: Some(52.15),
            light: Some(41.00),
        };
        assert_eq!(reading.to_string(), "T:22.15,H:52.15,L:41.00");
        assert_eq!(TelemetryReading::parse(&reading.to_string()), reading);
    }

    #[test]
    fn test_display_partial_reading() {
        let reading = TelemetryReading {
            temperature: None,
            humidity: Some(48.00),
            light: Some(7.50),
        };
        assert_eq!(reading.to_string(), "H:48.00,L:7.50");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_reading_serializes() {
        let reading = TelemetryReading::parse("T:21.00,H:50.00,L:30.00");
        let json = serde_json::to_string(&reading).unwrap();
        assert!(json.contains("\"temperature\":21.0"));
    }
}
