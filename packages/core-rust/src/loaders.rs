//! Whole-file loaders for entity lists and single binary values.
//!
//! [`BinaryListLoader`] reads and writes count-prefixed lists, optionally
//! encrypted at rest through a [`CryptoProcessor`]. [`JsonListLoader`]
//! reads JSON arrays and is read-only: JSON is a migration input format.

use std::fs;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::codec::{write_list, BinaryData, ByteReader};
use crate::crypto::CryptoProcessor;
use crate::error::StorageError;
use crate::table::TableSource;

/// Reads a file, decrypting it when a processor is configured.
///
/// # Errors
///
/// Returns [`StorageError::Io`] or [`StorageError::Crypto`].
pub fn read_file(
    path: &Path,
    processor: Option<&dyn CryptoProcessor>,
) -> Result<Vec<u8>, StorageError> {
    let bytes = fs::read(path).map_err(|e| StorageError::io(path, e))?;
    match processor {
        Some(p) => p.decrypt(&bytes),
        None => Ok(bytes),
    }
}

/// Writes a file, encrypting it when a processor is configured. Parent
/// folders are created as needed.
///
/// # Errors
///
/// Returns [`StorageError::Io`].
pub fn write_file(
    path: &Path,
    bytes: &[u8],
    processor: Option<&dyn CryptoProcessor>,
) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
    }
    let data = match processor {
        Some(p) => p.encrypt(bytes),
        None => bytes.to_vec(),
    };
    fs::write(path, data).map_err(|e| StorageError::io(path, e))
}

/// Reads a single binary value spanning the whole (decrypted) file.
///
/// # Errors
///
/// Returns [`StorageError::Corrupt`] when the contents do not decode.
pub fn read_binary<T: BinaryData>(
    path: &Path,
    processor: Option<&dyn CryptoProcessor>,
) -> Result<T, StorageError> {
    let bytes = read_file(path, processor)?;
    T::from_bytes(&bytes).map_err(|e| StorageError::corrupt(path, e))
}

/// Writes a single binary value.
///
/// # Errors
///
/// Returns [`StorageError::Io`].
pub fn write_binary<T: BinaryData>(
    path: &Path,
    value: &T,
    processor: Option<&dyn CryptoProcessor>,
) -> Result<(), StorageError> {
    write_file(path, &value.to_bytes(), processor)
}

/// Count-prefixed binary list file, optionally encrypted.
pub struct BinaryListLoader<T> {
    processor: Option<Arc<dyn CryptoProcessor>>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> BinaryListLoader<T> {
    #[must_use]
    pub fn new(processor: Option<Arc<dyn CryptoProcessor>>) -> Self {
        Self {
            processor,
            _marker: PhantomData,
        }
    }
}

impl<T: BinaryData> TableSource<T> for BinaryListLoader<T> {
    fn load(&self, path: &Path) -> Result<Vec<T>, StorageError> {
        let bytes = read_file(path, self.processor.as_deref())?;
        let mut reader = ByteReader::new(&bytes);
        let items = reader
            .read_list()
            .map_err(|e| StorageError::corrupt(path, e))?;
        Ok(items)
    }

    fn save(&self, items: &[T], path: &Path) -> Result<(), StorageError> {
        let mut out = Vec::new();
        write_list(items, &mut out);
        write_file(path, &out, self.processor.as_deref())
    }

    fn extension(&self) -> &'static str {
        "bin"
    }
}

/// Read-only JSON array file.
pub struct JsonListLoader<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonListLoader<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonListLoader<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses a JSON array file.
///
/// # Errors
///
/// Returns [`StorageError::Io`] or [`StorageError::Json`].
pub fn read_json_list<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let file = fs::File::open(path).map_err(|e| StorageError::io(path, e))?;
    serde_json::from_reader(std::io::BufReader::new(file)).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

impl<T: DeserializeOwned> TableSource<T> for JsonListLoader<T> {
    fn load(&self, path: &Path) -> Result<Vec<T>, StorageError> {
        read_json_list(path)
    }

    fn save(&self, _items: &[T], _path: &Path) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("writing JSON"))
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}
