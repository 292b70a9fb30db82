//! The active log file.
//!
//! [`ActiveLogFile`] is the single open append target of a store. Its name is
//! derived from the configured strftime pattern when it is opened, so a new
//! day (or hour, depending on the pattern) starts a new file on the next
//! rotation. A file that already exists is appended to and its header is not
//! repeated.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;

use crate::entry::{HEADER, LogEntry};
use crate::error::{Result, StorageError};

/// An open CSV log file accepting appended rows.
#[derive(Debug)]
pub struct ActiveLogFile {
    /// Full path of the file.
    path: PathBuf,
    /// File name inside the log directory.
    filename: String,
    /// CSV writer over the append handle.
    writer: csv::Writer<File>,
}

impl ActiveLogFile {
    /// Opens (creating if absent) the file named by `filename_pattern` at `now`.
    ///
    /// Writes the header row only when the file is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file cannot be opened, or
    /// [`StorageError::Write`] if the header cannot be written.
    pub fn open(log_dir: &Path, filename_pattern: &str, now: NaiveDateTime) -> Result<Self> {
        let filename = now.format(filename_pattern).to_string();
        let path = log_dir.join(&filename);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StorageError::Open {
                path: path.clone(),
                source: e,
            })?;

        let existing_len = file
            .metadata()
            .map_err(|e| StorageError::Metadata {
                path: path.clone(),
                source: e,
            })?
            .len();

        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        let mut active = Self {
            path,
            filename,
            writer,
        };

        if existing_len == 0 {
            active
                .writer
                .write_record(HEADER)
                .map_err(|e| active.write_error(e.into()))?;
            active.sync()?;
        }

        tracing::debug!(path = %active.path.display(), existing_len, "opened log file");

        Ok(active)
    }

    /// Appends rows in order. Nothing is forced to storage until [`sync`](Self::sync).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if a row cannot be written.
    pub fn append<'a, I>(&mut self, entries: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a LogEntry>,
    {
        let mut written = 0;
        for entry in entries {
            self.writer
                .write_record(entry.to_record())
                .map_err(|e| self.write_error(e.into()))?;
            written += 1;
        }
        Ok(written)
    }

    /// Flushes the CSV writer and forces the file contents to storage.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] or [`StorageError::Sync`].
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| self.write_error(e))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| StorageError::Sync {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(())
    }

    /// Current size of the file in bytes, including unsynced rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if pending rows cannot be flushed, or
    /// [`StorageError::Metadata`] if the size cannot be read.
    pub fn size_bytes(&mut self) -> Result<u64> {
        self.writer.flush().map_err(|e| self.write_error(e))?;
        let metadata = self
            .writer
            .get_ref()
            .metadata()
            .map_err(|e| StorageError::Metadata {
                path: self.path.clone(),
                source: e,
            })?;
        Ok(metadata.len())
    }

    /// Syncs and closes the file, returning its path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] or [`StorageError::Sync`].
    pub fn close(mut self) -> Result<PathBuf> {
        self.sync()?;
        let path = self.path.clone();
        let file = self
            .writer
            .into_inner()
            .map_err(|e| StorageError::Write {
                path: path.clone(),
                source: e.into_error(),
            })?;
        drop(file);
        tracing::debug!(path = %path.display(), "closed log file");
        Ok(path)
    }

    /// File name inside the log directory.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Full path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: std::io::Error) -> StorageError {
        StorageError::Write {
            path: self.path.clone(),
            source,
        }
    }
}
