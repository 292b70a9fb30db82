//! Error types for the sensorlog store.
//!
//! The taxonomy separates failures by how a caller is expected to react:
//!
//! - [`ConfigError`] is fatal and only surfaces while constructing a store.
//! - [`StorageError`] is fatal to the store instance that raised it. After a
//!   flush or rotation fails the store refuses further writes and has to be
//!   recreated.
//! - [`ParseError`] is scoped to one query call. A reader yields it once and
//!   then carries on with the next source file.
//! - [`SensorError`] is recoverable and belongs to the caller driving a sensor.
//! - [`RelayError`] covers the TCP relay in front of the store.

use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all sensorlog operations.
#[derive(Error, Debug)]
pub enum LogError {
    /// Error loading or validating configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error on the write path (buffer flush, rotation, archival).
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Error while reading logs back.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// Error raised by a sensor generator.
    #[error("sensor error: {0}")]
    Sensor(#[from] SensorError),

    /// Error in the network relay.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
}

/// Errors that can occur while loading the store configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config file '{}': {source}", path.display())]
    Read {
        /// The config file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON or misses a required key.
    #[error("failed to parse config file '{}': {source}", path.display())]
    Parse {
        /// The config file path.
        path: PathBuf,
        /// The underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A configuration value is out of range or malformed.
    #[error("invalid value for '{field}': {reason}")]
    Invalid {
        /// The offending key.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },
}

/// Errors on the write path. All of them are fatal to the store instance.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The log or archive directory could not be created or listed.
    #[error("failed to access directory '{}': {source}", path.display())]
    DirectoryAccess {
        /// The directory path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The active log file could not be opened.
    #[error("failed to open log file '{}': {source}", path.display())]
    Open {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Writing rows to the active log file failed.
    #[error("failed to write log file '{}': {source}", path.display())]
    Write {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Forcing the active log file to storage failed.
    #[error("failed to sync log file '{}' to disk: {source}", path.display())]
    Sync {
        /// The log file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Reading file metadata (size) failed.
    #[error("failed to stat '{}': {source}", path.display())]
    Metadata {
        /// The file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Compressing a rotated file into its archive failed.
    #[error("failed to archive '{}' into '{}': {source}", source_path.display(), archive_path.display())]
    Compress {
        /// The plain file being archived.
        source_path: PathBuf,
        /// The archive being written.
        archive_path: PathBuf,
        /// The underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// Deleting the plain file after archival failed.
    #[error("failed to remove rotated file '{}': {source}", path.display())]
    RemoveOriginal {
        /// The plain file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A write was attempted while no active file is open.
    #[error("log store is not started")]
    NotStarted,

    /// A previous flush or rotation failed; the store must be recreated.
    #[error("log store failed earlier and no longer accepts writes")]
    Failed,

    /// A thread panicked while holding the writer lock.
    #[error("writer lock poisoned")]
    Poisoned,
}

/// Errors raised while reading log files back. Scoped to a single query.
#[derive(Error, Debug)]
pub enum ParseError {
    /// A source file or directory could not be read.
    #[error("failed to read '{}': {source}", path.display())]
    Read {
        /// The path being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// An archive could not be opened or decompressed.
    #[error("failed to open archive '{}': {source}", path.display())]
    Archive {
        /// The archive path.
        path: PathBuf,
        /// The underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// An archive does not hold exactly one file.
    #[error("archive '{}' holds {entries} entries, expected 1", path.display())]
    ArchiveLayout {
        /// The archive path.
        path: PathBuf,
        /// Number of entries found.
        entries: usize,
    },

    /// The CSV reader failed (I/O or invalid UTF-8).
    #[error("malformed CSV in '{}': {source}", path.display())]
    Csv {
        /// The source path.
        path: PathBuf,
        /// The underlying CSV error.
        #[source]
        source: csv::Error,
    },

    /// The header row does not match `timestamp,sensor_id,value,unit`.
    #[error("unexpected header in '{}': {found:?}", path.display())]
    Header {
        /// The source path.
        path: PathBuf,
        /// The header that was found.
        found: Vec<String>,
    },

    /// A row has the wrong number of columns.
    #[error("'{}' line {line}: expected 4 columns, found {found}", path.display())]
    Columns {
        /// The source path.
        path: PathBuf,
        /// 1-based line number.
        line: u64,
        /// Number of columns found.
        found: usize,
    },

    /// A timestamp cell is not ISO-8601.
    #[error("'{}' line {line}: invalid timestamp '{value}'", path.display())]
    Timestamp {
        /// The source path.
        path: PathBuf,
        /// 1-based line number.
        line: u64,
        /// The raw cell.
        value: String,
    },

    /// A value cell is not a float.
    #[error("'{}' line {line}: invalid value '{value}'", path.display())]
    Value {
        /// The source path.
        path: PathBuf,
        /// 1-based line number.
        line: u64,
        /// The raw cell.
        value: String,
    },
}

/// Errors raised by sensor generators.
#[derive(Error, Debug)]
pub enum SensorError {
    /// The sensor was disabled and cannot produce readings.
    #[error("sensor '{name}' is disabled")]
    Disabled {
        /// The sensor name.
        name: String,
    },

    /// The sensor's value range is empty or not finite.
    #[error("sensor '{name}' has invalid range [{min}, {max}]")]
    InvalidRange {
        /// The sensor name.
        name: String,
        /// Configured lower bound.
        min: f64,
        /// Configured upper bound.
        max: f64,
    },
}

/// Errors raised by the TCP relay.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The server could not bind its listening socket.
    #[error("failed to bind relay server on '{addr}': {source}")]
    Bind {
        /// The requested address.
        addr: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Socket I/O failed.
    #[error("relay I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A message was not valid JSON or missed a field.
    #[error("invalid relay message: {0}")]
    Json(#[from] serde_json::Error),

    /// A message carried a timestamp that is not ISO-8601.
    #[error("invalid timestamp in relay message: '{value}'")]
    Timestamp {
        /// The raw timestamp.
        value: String,
    },
}

/// Type alias for `Result<T, LogError>`.
pub type Result<T> = std::result::Result<T, LogError>;
