//! Store configuration.
//!
//! A [`LogConfig`] is loaded once from a JSON file when the store is
//! constructed. Any problem with it (missing file, malformed JSON, missing
//! key, out-of-range value) is fatal at that point.
//!
//! ```json
//! {
//!     "log_dir": "logs",
//!     "filename_pattern": "sensors_%Y%m%d.csv",
//!     "buffer_size": 10,
//!     "rotate_every_hours": 24,
//!     "max_size_mb": 5,
//!     "rotate_after_lines": 10000,
//!     "retention_days": 7
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};

/// Name of the archive directory inside `log_dir`.
pub const ARCHIVE_DIR: &str = "archive";

/// Extension every live log file must carry.
pub const LOG_EXTENSION: &str = ".csv";

/// Default span of the in-memory rolling window.
pub const DEFAULT_ROLLING_WINDOW_HOURS: f64 = 12.0;

/// Largest hour span accepted anywhere (a little over a century).
pub const MAX_HOURS: f64 = 1_000_000.0;

fn default_rolling_window_hours() -> f64 {
    DEFAULT_ROLLING_WINDOW_HOURS
}

/// Configuration for a [`LogStore`](crate::store::LogStore).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Directory holding live CSV files; archives go to `<log_dir>/archive`.
    pub log_dir: PathBuf,

    /// strftime pattern evaluated when a log file is opened,
    /// e.g. `sensors_%Y%m%d.csv`.
    pub filename_pattern: String,

    /// Number of buffered entries that triggers a flush.
    pub buffer_size: usize,

    /// Rotate once this many hours have passed since the last rotation.
    pub rotate_every_hours: f64,

    /// Rotate once the active file reaches this size in MiB.
    pub max_size_mb: f64,

    /// Rotate once this many rows were written since the last rotation.
    #[serde(default)]
    pub rotate_after_lines: Option<u64>,

    /// Archives older than this many whole days are deleted.
    pub retention_days: u32,

    /// Span of the per-sensor rolling window.
    #[serde(default = "default_rolling_window_hours")]
    pub rolling_window_hours: f64,
}

impl LogConfig {
    /// Loads and validates a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Read`] if the file cannot be read
    /// - [`ConfigError::Parse`] if it is not valid JSON or misses a key
    /// - [`ConfigError::Invalid`] if a value fails validation
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<()> {
        if self.log_dir.as_os_str().is_empty() {
            return Err(invalid("log_dir", "must not be empty"));
        }

        self.validate_pattern()?;

        if self.buffer_size == 0 {
            return Err(invalid("buffer_size", "must be greater than 0"));
        }

        if !(self.rotate_every_hours > 0.0 && self.rotate_every_hours <= MAX_HOURS) {
            return Err(invalid(
                "rotate_every_hours",
                format!(
                    "must be in (0, {MAX_HOURS}], got {}",
                    self.rotate_every_hours
                ),
            ));
        }

        if !(self.max_size_mb.is_finite() && self.max_size_mb > 0.0) {
            return Err(invalid(
                "max_size_mb",
                format!("must be a positive number, got {}", self.max_size_mb),
            ));
        }

        if self.rotate_after_lines == Some(0) {
            return Err(invalid("rotate_after_lines", "must be greater than 0"));
        }

        if !(self.rolling_window_hours > 0.0 && self.rolling_window_hours <= MAX_HOURS) {
            return Err(invalid(
                "rolling_window_hours",
                format!(
                    "must be in (0, {MAX_HOURS}], got {}",
                    self.rolling_window_hours
                ),
            ));
        }

        Ok(())
    }

    fn validate_pattern(&self) -> Result<()> {
        let pattern = &self.filename_pattern;

        if pattern.contains('/') || pattern.contains('\\') {
            return Err(invalid(
                "filename_pattern",
                "must be a file name, not a path",
            ));
        }

        if !pattern.ends_with(LOG_EXTENSION) {
            return Err(invalid(
                "filename_pattern",
                format!("must end with '{LOG_EXTENSION}'"),
            ));
        }

        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return Err(invalid(
                "filename_pattern",
                format!("'{pattern}' is not a valid strftime pattern"),
            ));
        }

        Ok(())
    }

    /// Directory where rotated files are archived.
    pub fn archive_dir(&self) -> PathBuf {
        self.log_dir.join(ARCHIVE_DIR)
    }

    /// Span of the rolling window as a duration.
    pub fn rolling_window(&self) -> TimeDelta {
        hours_to_delta(self.rolling_window_hours)
    }
}

/// Converts fractional hours to a millisecond-precision duration.
///
/// Hours are clamped to `±MAX_HOURS`; NaN maps to zero.
#[allow(clippy::cast_possible_truncation)] // clamped hours fit in i64 millis
pub(crate) fn hours_to_delta(hours: f64) -> TimeDelta {
    let hours = if hours.is_nan() {
        0.0
    } else {
        hours.clamp(-MAX_HOURS, MAX_HOURS)
    };
    TimeDelta::milliseconds((hours * 3_600_000.0) as i64)
}

fn invalid(field: &'static str, reason: impl Into<String>) -> crate::error::LogError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogError;
    use tempfile::tempdir;

    fn valid_config() -> LogConfig {
        LogConfig {
            log_dir: PathBuf::from("logs"),
            filename_pattern: "sensors_%Y%m%d.csv".to_string(),
            buffer_size: 10,
            rotate_every_hours: 24.0,
            max_size_mb: 5.0,
            rotate_after_lines: None,
            retention_days: 7,
            rolling_window_hours: DEFAULT_ROLLING_WINDOW_HOURS,
        }
    }

    fn invalid_field(result: Result<()>) -> &'static str {
        match result.unwrap_err() {
            LogError::Config(ConfigError::Invalid { field, .. }) => field,
            other => panic!("Expected Invalid error, got: {:?}", other),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_load_applies_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "log_dir": "logs",
                "filename_pattern": "log_%Y-%m-%d.csv",
                "buffer_size": 2,
                "rotate_every_hours": 1,
                "max_size_mb": 0.5,
                "retention_days": 3,
                "unrelated": true
            }"#,
        )
        .unwrap();

        let config = LogConfig::load(&path).unwrap();
        assert_eq!(config.buffer_size, 2);
        assert_eq!(config.rotate_after_lines, None);
        assert_eq!(config.rolling_window_hours, DEFAULT_ROLLING_WINDOW_HOURS);
        assert_eq!(config.archive_dir(), PathBuf::from("logs").join("archive"));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        let result = LogConfig::load(dir.path().join("missing.json"));
        assert!(matches!(
            result,
            Err(LogError::Config(ConfigError::Read { .. }))
        ));
    }

    #[test]
    fn test_load_malformed_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            LogConfig::load(&path),
            Err(LogError::Config(ConfigError::Parse { .. }))
        ));
    }

    #[test]
    fn test_load_missing_required_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"log_dir": "logs", "buffer_size": 1}"#).unwrap();
        assert!(matches!(
            LogConfig::load(&path),
            Err(LogError::Config(ConfigError::Parse { .. }))
        ));
    }

    #[test]
    fn test_zero_buffer_size_rejected() {
        let config = LogConfig {
            buffer_size: 0,
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "buffer_size");
    }

    #[test]
    fn test_non_positive_thresholds_rejected() {
        let config = LogConfig {
            rotate_every_hours: 0.0,
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "rotate_every_hours");

        let config = LogConfig {
            max_size_mb: f64::NAN,
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "max_size_mb");

        let config = LogConfig {
            rotate_after_lines: Some(0),
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "rotate_after_lines");
    }

    #[test]
    fn test_unrepresentable_hours_rejected() {
        let config = LogConfig {
            rolling_window_hours: 1e12,
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "rolling_window_hours");

        let config = LogConfig {
            rotate_every_hours: f64::INFINITY,
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "rotate_every_hours");

        let config = LogConfig {
            rolling_window_hours: MAX_HOURS,
            ..valid_config()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pattern_rules() {
        let config = LogConfig {
            filename_pattern: "sub/sensors.csv".to_string(),
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "filename_pattern");

        let config = LogConfig {
            filename_pattern: "sensors_%Y.log".to_string(),
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "filename_pattern");

        let config = LogConfig {
            filename_pattern: "sensors_%Q.csv".to_string(),
            ..valid_config()
        };
        assert_eq!(invalid_field(config.validate()), "filename_pattern");
    }

    #[test]
    fn test_hours_to_delta() {
        assert_eq!(hours_to_delta(1.0), TimeDelta::hours(1));
        assert_eq!(hours_to_delta(0.5), TimeDelta::minutes(30));
        assert_eq!(hours_to_delta(f64::INFINITY), hours_to_delta(MAX_HOURS));
        assert_eq!(hours_to_delta(f64::NEG_INFINITY), hours_to_delta(-MAX_HOURS));
        assert_eq!(hours_to_delta(f64::NAN), TimeDelta::zero());
    }
}
