//! Contract between the time-series store and its backing files.
//!
//! The store never looks inside files or builds paths itself. A
//! [`DatedSource`] decides which files back a bucket, how to read and write
//! them, and what date a discovered file belongs to. A [`KeyMapper`]
//! decides how dates collapse into bucket keys.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// A file discovered while scanning a data folder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFileInfo {
    /// Name of the immediate subfolder holding the file, or `""` for the root.
    pub folder: String,
    /// Full path to the file.
    pub path: PathBuf,
}

/// A backing file together with the date its contents belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbFileWithDate {
    pub path: PathBuf,
    pub date: i32,
}

impl DbFileWithDate {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, date: i32) -> Self {
        Self {
            path: path.into(),
            date,
        }
    }
}

/// Storage-format specific access to the files backing each bucket.
///
/// Implementations differ by on-disk format (encrypted binary, JSON);
/// the store depends only on this trait.
pub trait DatedSource<V>: Send + Sync {
    /// Builds a bucket value from all files backing it.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when a file is missing or unreadable.
    fn load(&self, files: &[DbFileWithDate]) -> Result<V, StorageError>;

    /// Persists a bucket value under `folder`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] on write failure or when the source is read-only.
    fn save(&self, value: &V, folder: &Path, key: i32) -> Result<(), StorageError>;

    /// Extracts the date of a discovered file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidFileName`] when the name carries no date.
    fn date_of(&self, file: &DbFileInfo) -> Result<i32, StorageError>;

    /// Lists the files backing bucket `key` under `folder`.
    ///
    /// # Errors
    ///
    /// Returns a [`StorageError`] when the folder cannot be listed.
    fn file_names(&self, folder: &Path, key: i32) -> Result<Vec<DbFileWithDate>, StorageError>;
}

impl<V, T: DatedSource<V> + ?Sized> DatedSource<V> for Box<T> {
    fn load(&self, files: &[DbFileWithDate]) -> Result<V, StorageError> {
        (**self).load(files)
    }

    fn save(&self, value: &V, folder: &Path, key: i32) -> Result<(), StorageError> {
        (**self).save(value, folder, key)
    }

    fn date_of(&self, file: &DbFileInfo) -> Result<i32, StorageError> {
        (**self).date_of(file)
    }

    fn file_names(&self, folder: &Path, key: i32) -> Result<Vec<DbFileWithDate>, StorageError> {
        (**self).file_names(folder, key)
    }
}

/// Monotonic, many-to-one mapping from `yyyymmdd` dates to bucket keys.
pub trait KeyMapper: Send + Sync {
    /// Bucket key for `date`. Must be non-decreasing in `date`.
    fn key_of(&self, date: i32) -> i32;

    /// Earliest date that maps to `key`, or `None` when it does not fit
    /// an `i32`.
    fn first_date(&self, key: i32) -> Option<i32>;
}

/// One bucket per calendar month: `20240115 -> 202401`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonthlyKeys;

impl KeyMapper for MonthlyKeys {
    fn key_of(&self, date: i32) -> i32 {
        date / 100
    }

    fn first_date(&self, key: i32) -> Option<i32> {
        key.checked_mul(100)?.checked_add(1)
    }
}

/// One bucket per day: the key is the date itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DailyKeys;

impl KeyMapper for DailyKeys {
    fn key_of(&self, date: i32) -> i32 {
        date
    }

    fn first_date(&self, key: i32) -> Option<i32> {
        Some(key)
    }
}

/// Recursively lists every file under `root`.
///
/// Each file is tagged with the name of its immediate parent folder
/// relative to `root` (empty for files directly in `root`). A missing
/// root yields an empty list.
///
/// # Errors
///
/// Returns [`StorageError::Io`] when a directory cannot be read.
pub fn scan_files(root: &Path) -> Result<Vec<DbFileInfo>, StorageError> {
    let mut files = Vec::new();
    if !root.exists() {
        return Ok(files);
    }
    scan_dir(root, "", &mut files)?;
    Ok(files)
}

fn scan_dir(dir: &Path, folder: &str, out: &mut Vec<DbFileInfo>) -> Result<(), StorageError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| StorageError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StorageError::io(dir, e))?;
    entries.sort();

    let mut subdirs = Vec::new();
    for path in entries {
        if path.is_dir() {
            subdirs.push(path);
        } else {
            out.push(DbFileInfo {
                folder: folder.to_string(),
                path,
            });
        }
    }
    for sub in subdirs {
        let name = sub
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        scan_dir(&sub, &name, out)?;
    }
    Ok(())
}

/// Parses the file stem (name without extension) as an `i32`.
///
/// # Errors
///
/// Returns [`StorageError::InvalidFileName`] when the stem is not a number.
pub fn numeric_stem(path: &Path) -> Result<i32, StorageError> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| StorageError::InvalidFileName {
            path: path.to_path_buf(),
        })
}
