//! Query engine for reading log entries back from disk.
//!
//! A query scans every archive in `<log_dir>/archive` followed by every live
//! `.csv` file in `<log_dir>`, and lazily yields the rows whose timestamp lies
//! in `[start, end]` (inclusive) and whose sensor matches the optional filter.
//!
//! # Ordering
//!
//! Sources are visited in lexicographic file-name order within each group
//! (archives first, then live files) and rows keep their on-disk order.
//! There is **no** global ordering by timestamp: rows of different sensors
//! or of out-of-order ingestion interleave as they were written. Callers that
//! need chronological output use [`LogStore::read_sorted`](crate::store::LogStore::read_sorted).
//!
//! # Errors and resumption
//!
//! Parsing is strict. A malformed row yields one `Err` and the rest of that
//! source is abandoned; the next call to `next()` continues with the
//! following source. A source that disappeared after it was listed (swept or
//! rotated away) is skipped silently.
//!
//! # Snapshot semantics
//!
//! Live files are opened and measured when the query is created, and each
//! is read only up to the length it had at that point. Rows flushed later
//! are not seen, a flush in progress can never surface as a partial row, and
//! a file rotated away during the scan is still read through its open
//! handle. Rows still buffered in memory are never visible.
//!
//! The snapshot is only consistent when the listing does not overlap a
//! flush; [`LogStore::read`](crate::store::LogStore::read) lists under the
//! writer lock for that reason.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::archive;
use crate::config::LOG_EXTENSION;
use crate::entry::{LogEntry, is_header};
use crate::error::{ParseError, Result};

/// Time range and sensor filter applied to every row.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryFilter {
    /// Inclusive lower bound.
    pub start: NaiveDateTime,
    /// Inclusive upper bound.
    pub end: NaiveDateTime,
    /// Only rows of this sensor, if set.
    pub sensor_id: Option<String>,
}

impl QueryFilter {
    /// Creates a filter.
    pub fn new(start: NaiveDateTime, end: NaiveDateTime, sensor_id: Option<&str>) -> Self {
        Self {
            start,
            end,
            sensor_id: sensor_id.map(str::to_string),
        }
    }

    /// Returns true if `entry` passes the filter.
    pub fn matches(&self, entry: &LogEntry) -> bool {
        entry.timestamp >= self.start
            && entry.timestamp <= self.end
            && self
                .sensor_id
                .as_deref()
                .is_none_or(|id| entry.sensor_id == id)
    }
}

/// One file a query will read.
#[derive(Debug)]
pub enum Source {
    /// A compressed archive, opened lazily.
    Archive(PathBuf),
    /// A live CSV file, opened when the query was created.
    Live {
        /// Path of the file.
        path: PathBuf,
        /// Handle opened at listing time.
        file: File,
        /// Length of the file at listing time; bytes past it are ignored.
        len: u64,
    },
}

impl Source {
    /// Path of the source file.
    pub fn path(&self) -> &Path {
        match self {
            Source::Archive(path) => path,
            Source::Live { path, .. } => path,
        }
    }
}

/// Lists the sources of a query: archives first, then live files, each
/// group sorted by file name.
///
/// # Errors
///
/// Returns [`ParseError::Read`] if either directory cannot be listed.
pub fn list_sources(log_dir: &Path, archive_dir: &Path) -> Result<Vec<Source>> {
    let mut sources: Vec<Source> = sorted_files(archive_dir)?
        .into_iter()
        .filter(|path| archive::is_archive(path))
        .map(Source::Archive)
        .collect();

    for path in sorted_files(log_dir)? {
        if !path.to_string_lossy().ends_with(LOG_EXTENSION) {
            continue;
        }
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(ParseError::Read { path, source: e }.into()),
        };
        let len = match file.metadata() {
            Ok(metadata) => metadata.len(),
            Err(e) => return Err(ParseError::Read { path, source: e }.into()),
        };
        sources.push(Source::Live { path, file, len });
    }

    Ok(sources)
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_error = |e| ParseError::Read {
        path: dir.to_path_buf(),
        source: e,
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(read_error(e).into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(read_error)?;
        if entry.file_type().map_err(read_error)?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

type Records = csv::StringRecordsIntoIter<Box<dyn Read + Send>>;

/// Rows of the source currently being read.
struct SourceRows {
    path: PathBuf,
    records: Records,
}

impl SourceRows {
    /// Opens a source and validates its header. `Ok(None)` means the source
    /// vanished or is empty.
    fn open(source: Source) -> std::result::Result<Option<Self>, ParseError> {
        let (path, reader): (PathBuf, Box<dyn Read + Send>) = match source {
            Source::Archive(path) => match archive::read_entry(&path)? {
                Some((_name, contents)) => (path, Box::new(Cursor::new(contents))),
                None => return Ok(None),
            },
            Source::Live { path, file, len } => (path, Box::new(file.take(len))),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let header = reader.headers().map_err(|e| ParseError::Csv {
            path: path.clone(),
            source: e,
        })?;
        if header.is_empty() {
            return Ok(None);
        }
        if !is_header(header) {
            return Err(ParseError::Header {
                found: header.iter().map(str::to_string).collect(),
                path,
            });
        }

        Ok(Some(Self {
            path,
            records: reader.into_records(),
        }))
    }

    fn next_entry(&mut self) -> Option<std::result::Result<LogEntry, ParseError>> {
        let record = match self.records.next()? {
            Ok(record) => record,
            Err(e) => {
                return Some(Err(ParseError::Csv {
                    path: self.path.clone(),
                    source: e,
                }));
            }
        };
        Some(LogEntry::from_record(&record, &self.path))
    }
}

/// Lazy, filtered sequence of entries across all sources of one query.
pub struct LogReader {
    sources: VecDeque<Source>,
    current: Option<SourceRows>,
    filter: QueryFilter,
}

impl LogReader {
    /// Creates a reader over already-listed sources.
    pub fn new(sources: Vec<Source>, filter: QueryFilter) -> Self {
        Self {
            sources: sources.into(),
            current: None,
            filter,
        }
    }

    /// Lists the sources under `log_dir` and creates a reader over them.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Read`] if a directory cannot be listed.
    pub fn open(log_dir: &Path, archive_dir: &Path, filter: QueryFilter) -> Result<Self> {
        Ok(Self::new(list_sources(log_dir, archive_dir)?, filter))
    }

    /// The filter applied to every row.
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// Number of sources not yet started.
    pub fn remaining_sources(&self) -> usize {
        self.sources.len()
    }
}

impl std::fmt::Debug for LogReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogReader")
            .field("remaining_sources", &self.sources.len())
            .field("current", &self.current.as_ref().map(|rows| &rows.path))
            .field("filter", &self.filter)
            .finish()
    }
}

impl Iterator for LogReader {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(rows) = self.current.as_mut() else {
                let source = self.sources.pop_front()?;
                match SourceRows::open(source) {
                    Ok(rows) => self.current = rows,
                    Err(e) => return Some(Err(e.into())),
                }
                continue;
            };

            match rows.next_entry() {
                None => self.current = None,
                Some(Err(e)) => {
                    self.current = None;
                    return Some(Err(e.into()));
                }
                Some(Ok(entry)) => {
                    if self.filter.matches(&entry) {
                        return Some(Ok(entry));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};
    use tempfile::tempdir;

    fn at(secs: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_filter_bounds_inclusive() {
        let filter = QueryFilter::new(at(0), at(10), None);
        assert!(filter.matches(&LogEntry::new("a", at(0), 1.0, "u")));
        assert!(filter.matches(&LogEntry::new("a", at(10), 1.0, "u")));
        assert!(!filter.matches(&LogEntry::new("a", at(11), 1.0, "u")));
        assert!(!filter.matches(&LogEntry::new("a", at(-1), 1.0, "u")));
    }

    #[test]
    fn test_filter_sensor() {
        let filter = QueryFilter::new(at(0), at(10), Some("T01"));
        assert!(filter.matches(&LogEntry::new("T01", at(5), 1.0, "u")));
        assert!(!filter.matches(&LogEntry::new("T02", at(5), 1.0, "u")));
    }

    #[test]
    fn test_live_files_sorted_and_non_csv_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.csv"), "timestamp,sensor_id,value,unit\n").unwrap();
        fs::write(dir.path().join("a.csv"), "timestamp,sensor_id,value,unit\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let sources = list_sources(dir.path(), &dir.path().join("archive")).unwrap();
        let names: Vec<_> = sources
            .iter()
            .map(|s| s.path().file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);
    }

    #[test]
    fn test_reader_filters_rows() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("log.csv"),
            "timestamp,sensor_id,value,unit\n\
             2026-10-19T12:00:00,T01,1.0,°C\n\
             2026-10-19T12:00:05,T02,2.0,%\n\
             2026-10-19T12:00:10,T01,3.0,°C\n\
             2026-10-19T12:00:20,T01,4.0,°C\n",
        )
        .unwrap();

        let filter = QueryFilter::new(at(0), at(10), Some("T01"));
        let reader = LogReader::open(dir.path(), &dir.path().join("archive"), filter).unwrap();
        let values: Vec<f64> = reader.map(|r| r.unwrap().value).collect();
        assert_eq!(values, vec![1.0, 3.0]);
    }

    #[test]
    fn test_bad_header_is_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("log.csv"), "time,id,v,u\n").unwrap();

        let filter = QueryFilter::new(at(0), at(10), None);
        let mut reader = LogReader::open(dir.path(), &dir.path().join("archive"), filter).unwrap();
        assert!(matches!(
            reader.next(),
            Some(Err(crate::error::LogError::Parse(ParseError::Header { .. })))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn test_empty_file_yields_nothing() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("log.csv"), "").unwrap();

        let filter = QueryFilter::new(at(0), at(10), None);
        let reader = LogReader::open(dir.path(), &dir.path().join("archive"), filter).unwrap();
        assert_eq!(reader.count(), 0);
    }

    #[test]
    fn test_live_file_read_up_to_listed_length() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        fs::write(
            &path,
            "timestamp,sensor_id,value,unit\n2026-10-19T12:00:00,T01,1.0,°C\n",
        )
        .unwrap();

        let filter = QueryFilter::new(at(0), at(10), None);
        let reader = LogReader::open(dir.path(), &dir.path().join("archive"), filter).unwrap();

        // A flush caught halfway: one whole row, then a row cut off mid-unit.
        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"2026-10-19T12:00:01,T01,2.0,\xc2\xb0C\n2026-10-19T12:00:02,T0")
            .unwrap();

        let rows: Vec<LogEntry> = reader.map(Result::unwrap).collect();
        assert_eq!(rows, vec![LogEntry::new("T01", at(0), 1.0, "°C")]);
    }
}
