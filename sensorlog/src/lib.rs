//! # sensorlog
//!
//! Rotating, compressed, queryable log store for sensor readings.
//!
//! sensorlog buffers timestamped readings, appends them to a CSV file,
//! rotates that file into a deflated zip archive when it gets too old, too big
//! or too long, deletes archives past their retention period, and reads
//! everything back by time range and sensor. An in-memory rolling window
//! answers "latest value" and "average over the last N hours" without touching
//! disk.
//!
//! ## Key Properties
//!
//! - Plain CSV on disk, one row per reading, readable by any tool
//! - Rotation by elapsed time, file size or row count, whichever fires first
//! - Archives are immutable single-file zips; retention is by whole days
//! - Queries stream lazily across archives and live files
//! - One store per directory, shared between threads as `Arc<LogStore>`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sensorlog::{LogConfig, LogStore};
//! use chrono::{Local, TimeDelta};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LogConfig::load("config.json")?;
//! let store = LogStore::open(config)?;
//! store.start()?;
//!
//! let now = Local::now().naive_local();
//! store.ingest("T01", now, 21.5, "°C")?;
//! store.flush()?;
//!
//! for entry in store.read(now - TimeDelta::hours(1), now, Some("T01"))? {
//!     let entry = entry?;
//!     println!("{} {} {}", entry.timestamp, entry.value, entry.unit);
//! }
//!
//! store.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`LogStore`] — Top-level handle; owns the write path and the aggregator
//! - [`LogConfig`] — JSON configuration loaded once at construction
//! - [`LogEntry`] — One reading, one CSV row
//! - [`LogReader`] — Lazy query iterator
//!
//! ## Modules
//!
//! - [`store`] — Store lifecycle, ingest, flush, query entry points
//! - [`rotation`] — Rotation triggers and the write-path state machine
//! - [`active`] — The active CSV file
//! - [`archive`] — Zip archive writing and reading
//! - [`retention`] — Archive expiry
//! - [`query`] — Source listing and row streaming
//! - [`rolling`] — In-memory rolling window
//! - [`sensor`] — Simulated sensors
//! - [`relay`] — Newline-delimited JSON over TCP
//! - [`error`] — Error types

pub mod active;
pub mod archive;
pub mod clock;
pub mod config;
pub mod entry;
pub mod error;
pub mod query;
pub mod relay;
pub mod retention;
pub mod rolling;
pub mod rotation;
pub mod sensor;
pub mod store;

// Re-export primary API types at crate root for convenience.
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::LogConfig;
pub use entry::LogEntry;
pub use error::{LogError, Result};
pub use query::{LogReader, QueryFilter};
pub use rolling::{LatestReading, RollingAggregator};
pub use rotation::{RotationState, RotationTrigger};
pub use store::LogStore;
