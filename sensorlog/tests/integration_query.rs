//! Integration tests for the query engine: filtering, source order,
//! strict parsing and resumption after a bad source.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use sensorlog::error::ParseError;
use sensorlog::{LogConfig, LogEntry, LogError, LogStore, ManualClock};
use tempfile::tempdir;

const HEADER: &str = "timestamp,sensor_id,value,unit\n";

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 19)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

fn config(log_dir: &Path) -> LogConfig {
    LogConfig {
        log_dir: log_dir.to_path_buf(),
        filename_pattern: "sensors_%Y%m%d.csv".to_string(),
        buffer_size: 1,
        rotate_every_hours: 24.0,
        max_size_mb: 10.0,
        rotate_after_lines: None,
        retention_days: 7,
        rolling_window_hours: 12.0,
    }
}

fn open_store(log_dir: &Path) -> LogStore {
    let clock = Arc::new(ManualClock::new(base()));
    let store = LogStore::open_with_clock(config(log_dir), clock).unwrap();
    store.start().unwrap();
    store
}

#[test]
fn test_sensor_and_range_filter() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    for i in 0..10 {
        let ts = base() + TimeDelta::minutes(i);
        store.ingest("T01", ts, 20.0, "°C").unwrap();
        store.ingest("H1", ts, 50.0, "%").unwrap();
    }

    let start = base() + TimeDelta::minutes(2);
    let end = base() + TimeDelta::minutes(5);
    let rows: Vec<LogEntry> = store
        .read(start, end, Some("T01"))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(rows.len(), 4, "both bounds are inclusive");
    assert!(rows.iter().all(|e| e.sensor_id == "T01"));
    assert_eq!(rows.first().unwrap().timestamp, start);
    assert_eq!(rows.last().unwrap().timestamp, end);

    assert_eq!(store.read(start, end, None).unwrap().count(), 8);
    assert_eq!(store.read(start, end, Some("nope")).unwrap().count(), 0);
}

#[test]
fn test_empty_directory_yields_nothing() {
    let dir = tempdir().unwrap();
    let store = LogStore::open(config(&dir.path().join("logs"))).unwrap();
    assert_eq!(store.read(base(), base(), None).unwrap().count(), 0);
}

#[test]
fn test_malformed_row_then_resume_with_next_source() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("a_damaged.csv"),
        format!(
            "{HEADER}\
             2026-10-19T12:00:00,T01,1.0,°C\n\
             2026-10-19T12:00:01,T01,not-a-number,°C\n\
             2026-10-19T12:00:02,T01,3.0,°C\n"
        ),
    )
    .unwrap();
    fs::write(
        dir.path().join("b_intact.csv"),
        format!("{HEADER}2026-10-19T12:00:03,T01,4.0,°C\n"),
    )
    .unwrap();

    let store = open_store(dir.path());
    let mut reader = store
        .read(base(), base() + TimeDelta::minutes(1), None)
        .unwrap();

    assert_eq!(reader.next().unwrap().unwrap().value, 1.0);
    match reader.next() {
        Some(Err(LogError::Parse(ParseError::Value { path, line, value }))) => {
            assert!(path.ends_with("a_damaged.csv"));
            assert_eq!(line, 3);
            assert_eq!(value, "not-a-number");
        }
        other => panic!("Expected a value parse error, got: {other:?}"),
    }

    // The rest of the damaged file is skipped.
    assert_eq!(reader.next().unwrap().unwrap().value, 4.0);
    assert!(reader.next().is_none());
}

#[test]
fn test_bad_timestamp_and_column_count() {
    let dir = tempdir().unwrap();
    fs::write(
        dir.path().join("a.csv"),
        format!("{HEADER}19/10/2026 12:00,T01,1.0,°C\n"),
    )
    .unwrap();
    fs::write(
        dir.path().join("b.csv"),
        format!("{HEADER}2026-10-19T12:00:00,T01,1.0\n"),
    )
    .unwrap();

    let store = open_store(dir.path());
    let results: Vec<_> = store
        .read(base(), base() + TimeDelta::minutes(1), None)
        .unwrap()
        .collect();

    assert_eq!(results.len(), 2);
    assert!(matches!(
        results[0],
        Err(LogError::Parse(ParseError::Timestamp { line: 2, .. }))
    ));
    assert!(matches!(
        results[1],
        Err(LogError::Parse(ParseError::Columns { found: 3, .. }))
    ));
}

#[test]
fn test_archives_are_read_before_live_files() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());

    // Newer rows go to the archive, older rows stay live.
    store.ingest("T01", base() + TimeDelta::hours(1), 2.0, "°C").unwrap();
    store.rotate_now().unwrap();
    store.ingest("T01", base(), 1.0, "°C").unwrap();

    let end = base() + TimeDelta::hours(2);
    let values: Vec<f64> = store
        .read(base(), end, None)
        .unwrap()
        .map(|e| e.unwrap().value)
        .collect();
    assert_eq!(values, vec![2.0, 1.0]);

    let sorted: Vec<f64> = store
        .read_sorted(base(), end, None)
        .unwrap()
        .into_iter()
        .map(|e| e.value)
        .collect();
    assert_eq!(sorted, vec![1.0, 2.0]);
}

#[test]
fn test_buffered_rows_invisible_until_flush() {
    let dir = tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(base()));
    let store = LogStore::open_with_clock(
        LogConfig {
            buffer_size: 5,
            ..config(dir.path())
        },
        clock,
    )
    .unwrap();
    store.start().unwrap();

    store.ingest("T01", base(), 1.0, "°C").unwrap();
    assert_eq!(store.read(base(), base(), None).unwrap().count(), 0);

    store.flush().unwrap();
    assert_eq!(store.read(base(), base(), None).unwrap().count(), 1);
}

#[test]
fn test_query_is_repeatable() {
    let dir = tempdir().unwrap();
    let store = open_store(dir.path());
    store.ingest("T01", base(), 1.0, "°C").unwrap();

    let first: Vec<_> = store.read(base(), base(), None).unwrap().map(Result::unwrap).collect();
    let second: Vec<_> = store.read(base(), base(), None).unwrap().map(Result::unwrap).collect();
    assert_eq!(first, second);
}
