//! Store module for the sensorlog engine.
//!
//! This module provides the top-level API that ties all components together.
//! A [`LogStore`] owns the entry buffer, the rotation manager (and through it
//! the active file and the retention sweeper) and the rolling aggregator.
//!
//! # Design
//!
//! The store acts as the central coordinator:
//! - Buffers ingested entries and flushes them once `buffer_size` is reached
//! - Checks rotation triggers after every threshold flush
//! - Keeps the rolling aggregator current on every ingestion
//! - Serves historical queries from archives and live files
//!
//! # File Layout
//!
//! ```text
//! log_dir/
//! ├── sensors_20261019.csv              <- active file (name from filename_pattern)
//! └── archive/
//!     └── sensors_20261018.csv_20261019_000003.zip
//! ```
//!
//! # Concurrency
//!
//! `LogStore` is `Send + Sync` and meant to be shared as `Arc<LogStore>`,
//! e.g. by a relay server handing one ingestion call per received message
//! from many connection threads. A single mutex serializes the buffer, the
//! active file and rotation. File I/O is blocking, so a rotation stalls every
//! concurrent ingester until it completes; this is a latency spike by
//! construction and the main scalability limit of the store.
//!
//! Queries take the writer lock only while listing (and opening) their
//! source files, then parse without it.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use sensorlog::store::LogStore;
//! use chrono::Local;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = LogStore::from_config_file("config.json")?;
//! store.start()?;
//!
//! let now = Local::now().naive_local();
//! store.ingest("T01", now, 21.5, "°C")?;
//!
//! if let Some(avg) = store.average("T01", 1.0) {
//!     println!("1h average: {avg:.2}");
//! }
//!
//! store.stop()?;
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::NaiveDateTime;

use crate::clock::{Clock, SystemClock};
use crate::config::LogConfig;
use crate::entry::LogEntry;
use crate::error::{Result, StorageError};
use crate::query::{self, LogReader, QueryFilter};
use crate::rolling::{LatestReading, RollingAggregator};
use crate::rotation::{RotationManager, RotationOutcome, RotationState, RotationTrigger};

/// Write-path state guarded by the store mutex.
#[derive(Debug)]
struct Writer {
    /// Entries waiting for the next flush, in arrival order.
    buffer: Vec<LogEntry>,
    /// Owner of the active file.
    rotation: RotationManager,
}

impl Writer {
    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.rotation.write(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }
}

/// Rotating, compressed, queryable log of sensor readings.
#[derive(Debug)]
pub struct LogStore {
    config: LogConfig,
    clock: Arc<dyn Clock>,
    writer: Mutex<Writer>,
    aggregator: RollingAggregator,
}

impl LogStore {
    /// Creates a store from a JSON config file, using the system clock.
    ///
    /// The store is created stopped; call [`start`](Self::start) before
    /// ingesting.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`](crate::error::ConfigError) if the file is
    /// missing or invalid, or [`StorageError::DirectoryAccess`] if the log
    /// directories cannot be created.
    pub fn from_config_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open(LogConfig::load(path)?)
    }

    /// Creates a store using the system clock.
    ///
    /// # Errors
    ///
    /// See [`open_with_clock`](Self::open_with_clock).
    pub fn open(config: LogConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a store reading "now" from `clock`.
    ///
    /// Validates the configuration and creates `log_dir` and its archive
    /// directory if needed. The time of this call is the initial
    /// `last_rotation`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`](crate::error::ConfigError::Invalid) or
    /// [`StorageError::DirectoryAccess`].
    pub fn open_with_clock(config: LogConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        for dir in [config.log_dir.clone(), config.archive_dir()] {
            fs::create_dir_all(&dir).map_err(|e| StorageError::DirectoryAccess {
                path: dir.clone(),
                source: e,
            })?;
        }

        let now = clock.now();
        let writer = Writer {
            buffer: Vec::with_capacity(config.buffer_size),
            rotation: RotationManager::new(&config, now),
        };
        let aggregator = RollingAggregator::new(config.rolling_window(), Arc::clone(&clock));

        Ok(Self {
            config,
            clock,
            writer: Mutex::new(writer),
            aggregator,
        })
    }

    /// Opens the active file. A no-op if already started.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Failed`] if the store failed earlier, or the
    /// error from opening the file.
    pub fn start(&self) -> Result<()> {
        let now = self.clock.now();
        self.lock_writer()?.rotation.start(now)
    }

    /// Buffers one reading and records it in the rolling aggregator.
    ///
    /// When the buffer reaches `buffer_size` it is flushed and the rotation
    /// triggers are checked. Callers typically treat ingestion as
    /// fire-and-forget and only log the error.
    ///
    /// # Errors
    ///
    /// - [`StorageError::NotStarted`] if the store is stopped; nothing is
    ///   buffered or aggregated
    /// - [`StorageError::Failed`] if an earlier flush or rotation failed
    /// - any fatal flush or rotation error raised by this call
    pub fn ingest(
        &self,
        sensor_id: &str,
        timestamp: NaiveDateTime,
        value: f64,
        unit: &str,
    ) -> Result<()> {
        self.ingest_entry(LogEntry::new(sensor_id, timestamp, value, unit))
    }

    /// Same as [`ingest`](Self::ingest) for an already built entry.
    ///
    /// # Errors
    ///
    /// See [`ingest`](Self::ingest).
    pub fn ingest_entry(&self, entry: LogEntry) -> Result<()> {
        let (sensor_id, timestamp, value, unit) = (
            entry.sensor_id.clone(),
            entry.timestamp,
            entry.value,
            entry.unit.clone(),
        );

        let flushed = {
            let mut writer = self.lock_writer()?;
            writer.rotation.ensure_open()?;
            writer.buffer.push(entry);

            if writer.buffer.len() >= self.config.buffer_size {
                self.flush_and_rotate(&mut writer)
            } else {
                Ok(None)
            }
        };

        self.aggregator.record(&sensor_id, timestamp, value, &unit);
        flushed.map(|_| ())
    }

    fn flush_and_rotate(&self, writer: &mut Writer) -> Result<Option<RotationOutcome>> {
        writer.flush()?;
        writer.rotation.check_and_rotate(self.clock.now())
    }

    /// Writes every buffered entry to the active file and syncs it.
    ///
    /// Does not check rotation triggers. A no-op when the buffer is empty.
    ///
    /// # Errors
    ///
    /// Returns the state or I/O error; I/O errors are fatal to the store.
    pub fn flush(&self) -> Result<()> {
        self.lock_writer()?.flush()
    }

    /// Flushes the buffer and closes the active file.
    ///
    /// Further ingestion fails with [`StorageError::NotStarted`] until
    /// [`start`](Self::start) is called again.
    ///
    /// # Errors
    ///
    /// Returns the flush or close error.
    pub fn stop(&self) -> Result<()> {
        let mut writer = self.lock_writer()?;
        if writer.rotation.state() == RotationState::Open {
            writer.flush()?;
        }
        writer.rotation.stop()
    }

    /// Stops the store and drops the rolling aggregator's windows.
    ///
    /// # Errors
    ///
    /// Returns the error from [`stop`](Self::stop).
    pub fn close(&self) -> Result<()> {
        let stopped = self.stop();
        self.aggregator.close();
        stopped
    }

    /// Rotates the active file now, regardless of triggers.
    ///
    /// The buffer is flushed first so the archive holds every ingested row.
    ///
    /// # Errors
    ///
    /// Returns the state error, or a fatal flush or rotation error.
    pub fn rotate_now(&self) -> Result<RotationOutcome> {
        let mut writer = self.lock_writer()?;
        writer.flush()?;
        writer
            .rotation
            .rotate(RotationTrigger::Manual, self.clock.now())
    }

    /// Lazily reads flushed entries with timestamp in `[start, end]`,
    /// optionally for one sensor.
    ///
    /// Sources are listed under the writer lock; parsing happens as the
    /// returned reader is iterated. See [`crate::query`] for ordering and
    /// error semantics.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Poisoned`] or a
    /// [`ParseError::Read`](crate::error::ParseError::Read) if a directory
    /// cannot be listed.
    pub fn read(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        sensor_id: Option<&str>,
    ) -> Result<LogReader> {
        let sources = {
            let _writer = self.lock_writer()?;
            query::list_sources(&self.config.log_dir, &self.config.archive_dir())?
        };
        Ok(LogReader::new(
            sources,
            QueryFilter::new(start, end, sensor_id),
        ))
    }

    /// Like [`read`](Self::read), but collects and orders entries by
    /// `(timestamp, sensor_id)`.
    ///
    /// # Errors
    ///
    /// Returns the first error produced while reading.
    pub fn read_sorted(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
        sensor_id: Option<&str>,
    ) -> Result<Vec<LogEntry>> {
        let mut entries = self
            .read(start, end, sensor_id)?
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.sensor_id.cmp(&b.sensor_id))
        });
        Ok(entries)
    }

    /// Last ingested reading per sensor (insertion order, not timestamp order).
    pub fn latest(&self) -> BTreeMap<String, LatestReading> {
        self.aggregator.latest()
    }

    /// Mean value of a sensor over the last `hours`, capped at the rolling
    /// window span.
    pub fn average(&self, sensor_id: &str, hours: f64) -> Option<f64> {
        self.aggregator.average(sensor_id, hours)
    }

    /// The rolling aggregator.
    pub fn aggregator(&self) -> &RollingAggregator {
        &self.aggregator
    }

    /// The store configuration.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Current lifecycle state of the write path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Poisoned`] if the writer lock is poisoned.
    pub fn state(&self) -> Result<RotationState> {
        Ok(self.lock_writer()?.rotation.state())
    }

    /// Rows written since the last rotation.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Poisoned`] if the writer lock is poisoned.
    pub fn line_count(&self) -> Result<u64> {
        Ok(self.lock_writer()?.rotation.line_count())
    }

    /// Number of entries waiting for the next flush.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Poisoned`] if the writer lock is poisoned.
    pub fn buffered(&self) -> Result<usize> {
        Ok(self.lock_writer()?.buffer.len())
    }

    /// Name of the active file, if started.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Poisoned`] if the writer lock is poisoned.
    pub fn active_filename(&self) -> Result<Option<String>> {
        Ok(self
            .lock_writer()?
            .rotation
            .active_filename()
            .map(str::to_string))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, Writer>> {
        self.writer
            .lock()
            .map_err(|_| StorageError::Poisoned.into())
    }
}

impl Drop for LogStore {
    fn drop(&mut self) {
        let Ok(writer) = self.writer.get_mut() else {
            return;
        };
        if writer.rotation.state() != RotationState::Open {
            return;
        }
        if let Err(e) = writer.flush().and_then(|()| writer.rotation.stop()) {
            tracing::warn!("failed to flush log store on drop: {e}");
        }
    }
}
