//! Archive containers for rotated log files.
//!
//! Each rotation produces one zip file holding exactly one deflated entry,
//! named after the original log file:
//!
//! ```text
//! log_dir/
//! ├── sensors_20261019.csv                          <- active file
//! └── archive/
//!     ├── sensors_20261018.csv_20261019_000012.zip  <- rotated at 00:00:12
//!     └── sensors_20261019.csv_20261019_120000.zip
//! ```
//!
//! Archives are created with `create_new` and never rewritten.

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use zip::CompressionMethod;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;

use crate::error::{ParseError, StorageError};

/// Extension of archive files.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Second-granularity stamp embedded in archive names.
const ROTATION_STAMP: &str = "%Y%m%d_%H%M%S";

/// Upper bound on `-N` suffixes tried for same-second rotations.
const MAX_NAME_ATTEMPTS: u32 = 10_000;

/// Base archive name for `filename` rotated at `rotated_at`, without extension.
pub fn archive_stem(filename: &str, rotated_at: NaiveDateTime) -> String {
    format!("{filename}_{}", rotated_at.format(ROTATION_STAMP))
}

/// Compresses `source` into a new single-entry archive under `archive_dir`.
///
/// The entry is named `entry_name`. When an archive with the base name
/// already exists (two rotations in the same second) a `-1`, `-2`, ...
/// suffix is added. Returns the path of the archive written.
///
/// # Errors
///
/// Returns [`StorageError::Compress`] if the archive cannot be created,
/// written or synced.
pub fn compress(
    source: &Path,
    entry_name: &str,
    archive_dir: &Path,
    rotated_at: NaiveDateTime,
) -> Result<PathBuf, StorageError> {
    let stem = archive_stem(entry_name, rotated_at);
    let (archive_path, file) = create_unique(archive_dir, &stem).map_err(|e| {
        StorageError::Compress {
            source_path: source.to_path_buf(),
            archive_path: archive_dir.join(format!("{stem}.{ARCHIVE_EXTENSION}")),
            source: e,
        }
    })?;

    write_entry(source, entry_name, file).map_err(|e| StorageError::Compress {
        source_path: source.to_path_buf(),
        archive_path: archive_path.clone(),
        source: e,
    })?;

    Ok(archive_path)
}

fn create_unique(archive_dir: &Path, stem: &str) -> Result<(PathBuf, File), ZipError> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = if attempt == 0 {
            format!("{stem}.{ARCHIVE_EXTENSION}")
        } else {
            format!("{stem}-{attempt}.{ARCHIVE_EXTENSION}")
        };
        let path = archive_dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free archive name for '{stem}'"),
    )
    .into())
}

fn write_entry(source: &Path, entry_name: &str, file: File) -> Result<(), ZipError> {
    let mut input = File::open(source)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(entry_name, options)?;
    io::copy(&mut input, &mut zip)?;
    let file = zip.finish()?;
    file.sync_all()?;
    Ok(())
}

/// Reads the single entry of an archive into memory.
///
/// Returns `Ok(None)` if the archive no longer exists (swept after it was
/// listed).
///
/// # Errors
///
/// Returns [`ParseError::Read`], [`ParseError::Archive`], or
/// [`ParseError::ArchiveLayout`] if the archive holds more or fewer than one
/// entry.
pub fn read_entry(path: &Path) -> Result<Option<(String, Vec<u8>)>, ParseError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ParseError::Read {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let archive_error = |e: ZipError| ParseError::Archive {
        path: path.to_path_buf(),
        source: e,
    };

    let mut archive = zip::ZipArchive::new(file).map_err(archive_error)?;
    if archive.len() != 1 {
        return Err(ParseError::ArchiveLayout {
            path: path.to_path_buf(),
            entries: archive.len(),
        });
    }

    let mut entry = archive.by_index(0).map_err(archive_error)?;
    let name = entry.name().to_string();
    let mut contents = Vec::new();
    entry
        .read_to_end(&mut contents)
        .map_err(|e| ParseError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(Some((name, contents)))
}

/// Returns true if `path` looks like an archive produced by rotation.
pub fn is_archive(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ARCHIVE_EXTENSION)
}
