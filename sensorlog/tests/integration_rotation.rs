//! Integration tests for rotation: each trigger on its own, archive layout,
//! and rows surviving the trip through an archive.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, TimeDelta};
use sensorlog::archive;
use sensorlog::{Clock, LogConfig, LogEntry, LogStore, ManualClock, RotationState};
use tempfile::tempdir;

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 19)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

/// Config where no trigger fires unless a test lowers one.
fn quiet_config(log_dir: &Path) -> LogConfig {
    LogConfig {
        log_dir: log_dir.to_path_buf(),
        filename_pattern: "sensors_%Y%m%d.csv".to_string(),
        buffer_size: 1,
        rotate_every_hours: 1000.0,
        max_size_mb: 1000.0,
        rotate_after_lines: None,
        retention_days: 30,
        rolling_window_hours: 12.0,
    }
}

fn open_store(config: LogConfig) -> (LogStore, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(base()));
    let store = LogStore::open_with_clock(config, clock.clone()).unwrap();
    store.start().unwrap();
    (store, clock)
}

fn archives(log_dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(log_dir.join("archive"))
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    paths.sort();
    paths
}

/// Data rows of an archive, header excluded.
fn archived_rows(path: &Path) -> Vec<String> {
    let (name, contents) = archive::read_entry(path).unwrap().unwrap();
    assert!(name.ends_with(".csv"));
    let text = String::from_utf8(contents).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("timestamp,sensor_id,value,unit"));
    lines.map(str::to_string).collect()
}

#[test]
fn test_line_trigger_scenario() {
    let dir = tempdir().unwrap();
    let config = LogConfig {
        rotate_after_lines: Some(5),
        ..quiet_config(dir.path())
    };
    let (store, _clock) = open_store(config);

    for i in 0..6 {
        store
            .ingest("T01", base() + TimeDelta::seconds(i), 20.0, "°C")
            .unwrap();
        if i == 4 {
            assert_eq!(store.line_count().unwrap(), 0, "rotated after the 5th flush");
        }
    }

    let archives = archives(dir.path());
    assert_eq!(archives.len(), 1);
    assert_eq!(archived_rows(&archives[0]).len(), 5);

    let live = fs::read_to_string(dir.path().join("sensors_20261019.csv")).unwrap();
    let live_rows: Vec<&str> = live.lines().skip(1).collect();
    assert_eq!(live_rows, vec!["2026-10-19T12:00:05,T01,20.0,°C"]);
    assert_eq!(store.line_count().unwrap(), 1);
}

#[test]
fn test_elapsed_trigger_alone() {
    let dir = tempdir().unwrap();
    let config = LogConfig {
        rotate_every_hours: 1.0,
        buffer_size: 2,
        ..quiet_config(dir.path())
    };
    let (store, clock) = open_store(config);

    store.ingest("T01", base(), 1.0, "°C").unwrap();
    clock.advance(TimeDelta::minutes(59));
    store.ingest("T01", clock.now(), 2.0, "°C").unwrap();
    assert!(archives(dir.path()).is_empty());
    assert_eq!(store.line_count().unwrap(), 2);

    clock.advance(TimeDelta::minutes(2));
    store.ingest("T01", clock.now(), 3.0, "°C").unwrap();
    assert!(archives(dir.path()).is_empty(), "no check without a threshold flush");
    store.ingest("T01", clock.now(), 4.0, "°C").unwrap();

    let archives = archives(dir.path());
    assert_eq!(archives.len(), 1);
    assert_eq!(archived_rows(&archives[0]).len(), 4);
    assert_eq!(store.line_count().unwrap(), 0);
}

#[test]
fn test_size_trigger_alone() {
    let dir = tempdir().unwrap();
    let config = LogConfig {
        // About 52 bytes: the header plus one row crosses it.
        max_size_mb: 0.00005,
        ..quiet_config(dir.path())
    };
    let (store, _clock) = open_store(config);

    store.ingest("T01", base(), 1.0, "°C").unwrap();

    let archives = archives(dir.path());
    assert_eq!(archives.len(), 1);
    assert_eq!(archived_rows(&archives[0]).len(), 1);
    assert_eq!(store.line_count().unwrap(), 0);
    assert_eq!(store.state().unwrap(), RotationState::Open);
}

#[test]
fn test_explicit_flush_does_not_rotate() {
    let dir = tempdir().unwrap();
    let config = LogConfig {
        buffer_size: 10,
        rotate_after_lines: Some(1),
        ..quiet_config(dir.path())
    };
    let (store, _clock) = open_store(config);

    store.ingest("T01", base(), 1.0, "°C").unwrap();
    store.flush().unwrap();
    assert!(archives(dir.path()).is_empty());
    assert_eq!(store.line_count().unwrap(), 1);
}

#[test]
fn test_archive_name_and_plain_file_removed() {
    let dir = tempdir().unwrap();
    let (store, _clock) = open_store(quiet_config(dir.path()));
    store.ingest("T01", base(), 1.0, "°C").unwrap();

    let outcome = store.rotate_now().unwrap();
    assert_eq!(
        outcome.archive.file_name().unwrap().to_string_lossy(),
        "sensors_20261019.csv_20261019_120000.zip"
    );

    // A second rotation in the same second must not overwrite the first.
    store.ingest("T01", base(), 2.0, "°C").unwrap();
    let second = store.rotate_now().unwrap();
    assert_ne!(second.archive, outcome.archive);
    assert_eq!(archives(dir.path()).len(), 2);

    // The fresh active file only holds its header.
    let live = fs::read_to_string(dir.path().join("sensors_20261019.csv")).unwrap();
    assert_eq!(live.lines().count(), 1);
}

#[test]
fn test_round_trip_through_archive() {
    let dir = tempdir().unwrap();
    let (store, _clock) = open_store(LogConfig {
        buffer_size: 3,
        ..quiet_config(dir.path())
    });

    let entries = vec![
        LogEntry::new("T01", base(), 21.5, "°C"),
        LogEntry::new("H1", base() + TimeDelta::milliseconds(250), 0.1, "%"),
        LogEntry::new("P,1", base() + TimeDelta::seconds(1), -1013.25, "hPa"),
        LogEntry::new("A1", base() + TimeDelta::seconds(2), 1e-7, "µg/m³"),
        LogEntry::new("T01", base() + TimeDelta::seconds(3), 1.0 / 3.0, "°C"),
    ];

    for entry in &entries[..3] {
        store.ingest_entry(entry.clone()).unwrap();
    }
    store.rotate_now().unwrap();
    for entry in &entries[3..] {
        store.ingest_entry(entry.clone()).unwrap();
    }
    store.flush().unwrap();

    let read: Vec<LogEntry> = store
        .read(base(), base() + TimeDelta::seconds(3), None)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(read, entries);
}

#[test]
fn test_rotation_failure_is_fatal() {
    let dir = tempdir().unwrap();
    let (store, _clock) = open_store(LogConfig {
        rotate_after_lines: Some(1),
        ..quiet_config(dir.path())
    });

    fs::remove_dir_all(dir.path().join("archive")).unwrap();
    assert!(store.ingest("T01", base(), 1.0, "°C").is_err());
    assert_eq!(store.state().unwrap(), RotationState::Failed);

    assert!(store.ingest("T01", base(), 2.0, "°C").is_err());
    assert!(store.start().is_err());
}
