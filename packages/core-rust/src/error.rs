//! Error types for the storage core.
//!
//! [`CodecError`] covers malformed binary input; [`StorageError`] covers
//! everything that can go wrong while moving a bucket between memory and
//! its backing files. "Not found" is never an error here: lookups return
//! `Option`.

use std::path::{Path, PathBuf};

/// Failure while decoding the little-endian binary format.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    #[error("string is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid length prefix")]
    InvalidLength,
    #[error("invalid {what} tag {tag}")]
    InvalidTag { what: &'static str, tag: u8 },
}

/// Failure while loading or persisting records.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt data in {}: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: CodecError,
    },
    #[error("json error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("cannot derive a date from file name {}", .path.display())]
    InvalidFileName { path: PathBuf },
    #[error("bucket {key} has no backing files")]
    MissingBucket { key: i32 },
    #[error("decryption failed: {0}")]
    Crypto(String),
    #[error("{0} is not supported by this source")]
    Unsupported(&'static str),
}

impl StorageError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wraps a codec error with the path of the file being decoded.
    pub fn corrupt(path: impl AsRef<Path>, source: CodecError) -> Self {
        Self::Corrupt {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}
