//! Retention sweeper for archived log files.
//!
//! The sweeper runs synchronously inside every rotation. It deletes archives
//! whose age, in whole days since their last modification, is strictly
//! greater than `retention_days`. An archive exactly `retention_days` old is
//! kept.
//!
//! Sweeping is best-effort: a file that cannot be deleted is logged and
//! reported in the [`SweepReport`], and the rotation carries on.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDateTime};

/// Outcome of one sweep.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Archives that were deleted.
    pub deleted: Vec<PathBuf>,
    /// Number of archives inspected and kept.
    pub retained: usize,
    /// Paths that could not be inspected or deleted.
    pub failures: Vec<(PathBuf, io::Error)>,
}

/// Deletes archives older than the retention period.
#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    archive_dir: PathBuf,
    retention_days: u32,
}

impl RetentionSweeper {
    /// Creates a sweeper over `archive_dir`.
    pub fn new(archive_dir: impl Into<PathBuf>, retention_days: u32) -> Self {
        Self {
            archive_dir: archive_dir.into(),
            retention_days,
        }
    }

    /// Directory being swept.
    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Configured retention in days.
    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    /// Whole days between `modified` and `now`, rounded down.
    pub fn age_days(modified: SystemTime, now: NaiveDateTime) -> i64 {
        let modified = DateTime::<Local>::from(modified).naive_local();
        (now - modified).num_days()
    }

    /// Returns true if an archive of the given age must be deleted.
    pub fn is_expired(&self, age_days: i64) -> bool {
        age_days > i64::from(self.retention_days)
    }

    /// Deletes every regular file in the archive directory that is expired at `now`.
    pub fn sweep(&self, now: NaiveDateTime) -> SweepReport {
        let mut report = SweepReport::default();

        let entries = match fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(
                    dir = %self.archive_dir.display(),
                    "retention sweep could not list archives: {e}"
                );
                report.failures.push((self.archive_dir.clone(), e));
                return report;
            }
        };

        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    report.failures.push((self.archive_dir.clone(), e));
                    continue;
                }
            };
            let path = entry.path();

            let modified = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata.modified(),
                Ok(_) => continue,
                Err(e) => Err(e),
            };
            let modified = match modified {
                Ok(modified) => modified,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "cannot read archive mtime: {e}");
                    report.failures.push((path, e));
                    continue;
                }
            };

            let age = Self::age_days(modified, now);
            if !self.is_expired(age) {
                report.retained += 1;
                continue;
            }

            match fs::remove_file(&path) {
                Ok(()) => {
                    tracing::info!(path = %path.display(), age_days = age, "deleted expired archive");
                    report.deleted.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "failed to delete expired archive: {e}");
                    report.failures.push((path, e));
                }
            }
        }

        report
    }
}
