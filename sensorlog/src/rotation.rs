//! Rotation manager.
//!
//! The rotation manager exclusively owns the [`ActiveLogFile`] and decides
//! when it is rotated into an archive.
//!
//! # State machine
//!
//! ```text
//!            start()                 trigger
//! Stopped ───────────► Open ───────────────────► Rotating
//!    ▲                 │  ▲                         │
//!    └──── stop() ─────┘  └──── reopen new file ────┘
//!
//! any I/O failure while writing or rotating ─► Failed (terminal)
//! ```
//!
//! Triggers are evaluated after each flush caused by a full buffer. Three
//! independent conditions are OR-combined:
//!
//! 1. hours since the last rotation ≥ `rotate_every_hours`
//! 2. active file size in MiB ≥ `max_size_mb`
//! 3. rows written since the last rotation ≥ `rotate_after_lines` (if set)
//!
//! Rotating closes the active file, compresses it into a single-entry archive,
//! deletes the plain file, runs the [`RetentionSweeper`], resets the counters
//! and opens a fresh active file. Compression or deletion failures are fatal:
//! the manager moves to [`RotationState::Failed`] and rejects all further
//! writes. There is no retry.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::active::ActiveLogFile;
use crate::archive;
use crate::config::LogConfig;
use crate::entry::LogEntry;
use crate::error::{Result, StorageError};
use crate::retention::{RetentionSweeper, SweepReport};

const BYTES_PER_MIB: f64 = 1_048_576.0;

/// Lifecycle state of the rotation manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationState {
    /// No active file; writes are rejected.
    Stopped,
    /// An active file is open and accepting rows.
    Open,
    /// A rotation is in progress.
    Rotating,
    /// A write or rotation failed; the store must be recreated.
    Failed,
}

/// Which condition caused a rotation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RotationTrigger {
    /// The rotation interval elapsed.
    Elapsed {
        /// Hours since the previous rotation.
        hours: f64,
    },
    /// The active file grew past the size limit.
    Size {
        /// Size of the active file in MiB.
        mb: f64,
    },
    /// The row limit was reached.
    Lines {
        /// Rows written since the previous rotation.
        lines: u64,
    },
    /// Requested explicitly, independent of the limits.
    Manual,
}

/// Result of a completed rotation.
#[derive(Debug)]
pub struct RotationOutcome {
    /// The condition that fired.
    pub trigger: RotationTrigger,
    /// Path of the archive that was written.
    pub archive: PathBuf,
    /// Rows written to the rotated file since the previous rotation.
    pub rows: u64,
    /// What the retention sweep did.
    pub sweep: SweepReport,
}

/// Owns the active log file and performs rotations.
#[derive(Debug)]
pub struct RotationManager {
    log_dir: PathBuf,
    filename_pattern: String,
    rotate_every_hours: f64,
    max_size_mb: f64,
    rotate_after_lines: Option<u64>,
    sweeper: RetentionSweeper,

    state: RotationState,
    active: Option<ActiveLogFile>,
    /// Rows written since the last rotation.
    line_count: u64,
    /// Instant of the last rotation, or of construction.
    last_rotation: NaiveDateTime,
}

impl RotationManager {
    /// Creates a stopped manager. `now` becomes the initial `last_rotation`.
    pub fn new(config: &LogConfig, now: NaiveDateTime) -> Self {
        Self {
            log_dir: config.log_dir.clone(),
            filename_pattern: config.filename_pattern.clone(),
            rotate_every_hours: config.rotate_every_hours,
            max_size_mb: config.max_size_mb,
            rotate_after_lines: config.rotate_after_lines,
            sweeper: RetentionSweeper::new(config.archive_dir(), config.retention_days),
            state: RotationState::Stopped,
            active: None,
            line_count: 0,
            last_rotation: now,
        }
    }

    /// Opens the active file. A no-op if it is already open.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Failed`] after an earlier fatal error, or the
    /// error from opening the file (which also marks the manager failed).
    pub fn start(&mut self, now: NaiveDateTime) -> Result<()> {
        match self.state {
            RotationState::Open => Ok(()),
            RotationState::Failed | RotationState::Rotating => Err(StorageError::Failed.into()),
            RotationState::Stopped => {
                let opened = ActiveLogFile::open(&self.log_dir, &self.filename_pattern, now);
                let active = self.fatal(opened)?;
                tracing::info!(file = active.filename(), "log store started");
                self.active = Some(active);
                self.state = RotationState::Open;
                Ok(())
            }
        }
    }

    /// Returns an error unless rows can currently be written.
    ///
    /// # Errors
    ///
    /// [`StorageError::NotStarted`] when stopped, [`StorageError::Failed`]
    /// after a fatal error.
    pub fn ensure_open(&self) -> Result<()> {
        match self.state {
            RotationState::Open => Ok(()),
            RotationState::Stopped => Err(StorageError::NotStarted.into()),
            RotationState::Rotating | RotationState::Failed => Err(StorageError::Failed.into()),
        }
    }

    /// Writes rows to the active file and forces them to storage.
    ///
    /// # Errors
    ///
    /// Returns the state error from [`ensure_open`](Self::ensure_open), or the
    /// I/O error, in which case the manager is marked failed.
    pub fn write(&mut self, entries: &[LogEntry]) -> Result<()> {
        self.ensure_open()?;
        let Some(active) = self.active.as_mut() else {
            return Err(StorageError::NotStarted.into());
        };

        let written = active.append(entries).and_then(|n| active.sync().map(|()| n));
        let written = self.fatal(written)?;
        self.line_count += written;
        Ok(())
    }

    /// Closes the active file. A no-op when already stopped.
    ///
    /// # Errors
    ///
    /// Returns the error from closing the file, which marks the manager failed.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(active) = self.active.take() {
            let closed = active.close();
            self.fatal(closed)?;
        }
        if self.state == RotationState::Open {
            self.state = RotationState::Stopped;
            tracing::info!("log store stopped");
        }
        Ok(())
    }

    /// Evaluates the rotation triggers at `now`.
    ///
    /// # Errors
    ///
    /// Returns the error from reading the active file size, which marks the
    /// manager failed.
    pub fn check(&mut self, now: NaiveDateTime) -> Result<Option<RotationTrigger>> {
        self.ensure_open()?;

        #[allow(clippy::cast_precision_loss)] // elapsed millis fit f64 exactly for any real uptime
        let hours = (now - self.last_rotation).num_milliseconds() as f64 / 3_600_000.0;
        if hours >= self.rotate_every_hours {
            return Ok(Some(RotationTrigger::Elapsed { hours }));
        }

        let Some(active) = self.active.as_mut() else {
            return Err(StorageError::NotStarted.into());
        };
        let size = active.size_bytes();
        let size = self.fatal(size)?;
        #[allow(clippy::cast_precision_loss)] // log files are far below 2^53 bytes
        let mb = size as f64 / BYTES_PER_MIB;
        if mb >= self.max_size_mb {
            return Ok(Some(RotationTrigger::Size { mb }));
        }

        if let Some(limit) = self.rotate_after_lines
            && self.line_count >= limit
        {
            return Ok(Some(RotationTrigger::Lines {
                lines: self.line_count,
            }));
        }

        Ok(None)
    }

    /// Rotates if any trigger fires at `now`.
    ///
    /// # Errors
    ///
    /// Propagates fatal errors from [`check`](Self::check) and
    /// [`rotate`](Self::rotate).
    pub fn check_and_rotate(&mut self, now: NaiveDateTime) -> Result<Option<RotationOutcome>> {
        match self.check(now)? {
            Some(trigger) => self.rotate(trigger, now).map(Some),
            None => Ok(None),
        }
    }

    /// Rotates the active file into an archive and opens a new one.
    ///
    /// # Errors
    ///
    /// Any failure while closing, compressing, deleting or reopening is fatal
    /// and leaves the manager in [`RotationState::Failed`].
    pub fn rotate(&mut self, trigger: RotationTrigger, now: NaiveDateTime) -> Result<RotationOutcome> {
        self.ensure_open()?;
        self.state = RotationState::Rotating;

        let result = self.rotate_inner(trigger, now);
        let outcome = self.fatal(result)?;
        self.state = RotationState::Open;
        Ok(outcome)
    }

    fn rotate_inner(&mut self, trigger: RotationTrigger, now: NaiveDateTime) -> Result<RotationOutcome> {
        let active = self.active.take().ok_or(StorageError::NotStarted)?;
        let filename = active.filename().to_string();
        let source = active.close()?;

        let archive = archive::compress(&source, &filename, self.sweeper.archive_dir(), now)?;
        fs::remove_file(&source).map_err(|e| StorageError::RemoveOriginal {
            path: source.clone(),
            source: e,
        })?;

        let sweep = self.sweeper.sweep(now);
        let rows = self.line_count;
        self.last_rotation = now;
        self.line_count = 0;

        self.active = Some(ActiveLogFile::open(&self.log_dir, &self.filename_pattern, now)?);

        tracing::info!(
            archive = %archive.display(),
            rows,
            ?trigger,
            swept = sweep.deleted.len(),
            "rotated log file"
        );

        Ok(RotationOutcome {
            trigger,
            archive,
            rows,
            sweep,
        })
    }

    /// Marks the manager failed if `result` is an error.
    fn fatal<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::error!("log store failed: {e}");
            self.state = RotationState::Failed;
            self.active = None;
        }
        result
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RotationState {
        self.state
    }

    /// Rows written since the last rotation.
    pub fn line_count(&self) -> u64 {
        self.line_count
    }

    /// Instant of the last rotation (or of construction).
    pub fn last_rotation(&self) -> NaiveDateTime {
        self.last_rotation
    }

    /// Name of the active file, if one is open.
    pub fn active_filename(&self) -> Option<&str> {
        self.active.as_ref().map(ActiveLogFile::filename)
    }

    /// Path of the active file, if one is open.
    pub fn active_path(&self) -> Option<&Path> {
        self.active.as_ref().map(ActiveLogFile::path)
    }

    /// The sweeper run during rotation.
    pub fn sweeper(&self) -> &RetentionSweeper {
        &self.sweeper
    }
}
