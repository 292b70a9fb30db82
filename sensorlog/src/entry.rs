//! Log entries and their CSV row encoding.
//!
//! On disk every entry is one row of a four-column CSV file:
//!
//! ```text
//! timestamp,sensor_id,value,unit
//! 2026-10-19T12:00:00,T01,21.5,°C
//! 2026-10-19T12:00:01.250,T01,21.75,°C
//! ```
//!
//! Timestamps are ISO-8601 without an offset; the fractional part is only
//! written when non-zero. Values use Rust's shortest round-trip float form so
//! reading a row back yields the identical `f64`.

use std::path::Path;

use chrono::{DateTime, NaiveDateTime};
use csv::StringRecord;
use serde::Serialize;

use crate::error::ParseError;

/// The fixed header row of every log file.
pub const HEADER: [&str; 4] = ["timestamp", "sensor_id", "value", "unit"];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// One timestamped sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// When the reading was taken (local wall-clock time).
    pub timestamp: NaiveDateTime,
    /// Identifier of the sensor.
    pub sensor_id: String,
    /// The measured value.
    pub value: f64,
    /// Unit of the value.
    pub unit: String,
}

impl LogEntry {
    /// Creates a new entry.
    pub fn new(
        sensor_id: impl Into<String>,
        timestamp: NaiveDateTime,
        value: f64,
        unit: impl Into<String>,
    ) -> Self {
        Self {
            timestamp,
            sensor_id: sensor_id.into(),
            value,
            unit: unit.into(),
        }
    }

    /// Encodes the entry as the four CSV cells of a log row.
    pub fn to_record(&self) -> [String; 4] {
        [
            format_timestamp(&self.timestamp),
            self.sensor_id.clone(),
            // Debug keeps the trailing ".0" and round-trips exactly.
            format!("{:?}", self.value),
            self.unit.clone(),
        ]
    }

    /// Decodes a CSV row read from `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Columns`], [`ParseError::Timestamp`] or
    /// [`ParseError::Value`] naming the file and line of the bad row.
    pub fn from_record(record: &StringRecord, path: &Path) -> Result<Self, ParseError> {
        let line = record.position().map_or(0, csv::Position::line);

        if record.len() != HEADER.len() {
            return Err(ParseError::Columns {
                path: path.to_path_buf(),
                line,
                found: record.len(),
            });
        }

        let raw_timestamp = &record[0];
        let timestamp = parse_timestamp(raw_timestamp).ok_or_else(|| ParseError::Timestamp {
            path: path.to_path_buf(),
            line,
            value: raw_timestamp.to_string(),
        })?;

        let raw_value = &record[2];
        let value = raw_value
            .trim()
            .parse::<f64>()
            .map_err(|_| ParseError::Value {
                path: path.to_path_buf(),
                line,
                value: raw_value.to_string(),
            })?;

        Ok(Self {
            timestamp,
            sensor_id: record[1].to_string(),
            value,
            unit: record[3].to_string(),
        })
    }
}

/// Formats a timestamp as ISO-8601 text.
pub fn format_timestamp(timestamp: &NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses ISO-8601 text into a local timestamp.
///
/// Accepts the naive form written to log files (`T` or space separator,
/// optional fraction) as well as RFC 3339 text with an offset, which is
/// reduced to its wall-clock part.
pub fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    text.parse::<NaiveDateTime>()
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f").ok())
        .or_else(|| {
            DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.naive_local())
        })
}

/// Returns true if `record` is the expected header row.
pub(crate) fn is_header(record: &StringRecord) -> bool {
    record.iter().eq(HEADER.iter().copied())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn record(cells: &[&str], line: u64) -> StringRecord {
        let mut record = StringRecord::from(cells.to_vec());
        let mut pos = csv::Position::new();
        pos.set_line(line);
        record.set_position(Some(pos));
        record
    }

    #[test]
    fn test_to_record_format() {
        let entry = LogEntry::new("T01", ts(12, 0, 0), 10.0, "°C");
        assert_eq!(
            entry.to_record(),
            [
                "2026-10-19T12:00:00".to_string(),
                "T01".to_string(),
                "10.0".to_string(),
                "°C".to_string(),
            ]
        );
    }

    #[test]
    fn test_fractional_timestamp_is_kept() {
        let t = ts(8, 30, 0) + chrono::TimeDelta::milliseconds(250);
        let text = format_timestamp(&t);
        assert_eq!(text, "2026-10-19T08:30:00.250");
        assert_eq!(parse_timestamp(&text), Some(t));
    }

    #[test]
    fn test_parse_timestamp_variants() {
        assert_eq!(parse_timestamp("2026-10-19T12:00:00"), Some(ts(12, 0, 0)));
        assert_eq!(parse_timestamp("2026-10-19 12:00:00"), Some(ts(12, 0, 0)));
        assert_eq!(
            parse_timestamp("2026-10-19T12:00:00+02:00"),
            Some(ts(12, 0, 0))
        );
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_from_record() {
        let path = PathBuf::from("log.csv");
        let entry =
            LogEntry::from_record(&record(&["2026-10-19T12:00:00", "T01", "12.5", "°C"], 2), &path)
                .unwrap();
        assert_eq!(entry, LogEntry::new("T01", ts(12, 0, 0), 12.5, "°C"));
    }

    #[test]
    fn test_from_record_bad_value() {
        let path = PathBuf::from("log.csv");
        let err = LogEntry::from_record(
            &record(&["2026-10-19T12:00:00", "T01", "warm", "°C"], 7),
            &path,
        )
        .unwrap_err();
        match err {
            ParseError::Value { line, value, .. } => {
                assert_eq!(line, 7);
                assert_eq!(value, "warm");
            }
            other => panic!("Expected Value error, got: {:?}", other),
        }
    }

    #[test]
    fn test_from_record_bad_timestamp_and_columns() {
        let path = PathBuf::from("log.csv");
        assert!(matches!(
            LogEntry::from_record(&record(&["noon", "T01", "1.0", "°C"], 3), &path),
            Err(ParseError::Timestamp { line: 3, .. })
        ));
        assert!(matches!(
            LogEntry::from_record(&record(&["2026-10-19T12:00:00", "T01"], 4), &path),
            Err(ParseError::Columns { line: 4, found: 2, .. })
        ));
    }

    #[test]
    fn test_header_detection() {
        assert!(is_header(&StringRecord::from(HEADER.to_vec())));
        assert!(!is_header(&StringRecord::from(vec!["time", "id", "v", "u"])));
    }
}
