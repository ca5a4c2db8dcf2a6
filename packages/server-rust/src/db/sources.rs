//! On-disk formats for the ledger and the configurations that pick them.
//!
//! - Binary: `<dates>/<key>.bin`, one AES-encrypted [`FinanceRecord`] per month,
//!   plus encrypted `.bin` dictionary lists. This is the live format.
//! - JSON: `<dates>/<yyyymmdd>/*.json` arrays of operations, plus `.json`
//!   dictionary lists. Read-only; used as migration input.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tsvault_core::loaders::{read_binary, read_json_list, write_binary};
use tsvault_core::source::numeric_stem;
use tsvault_core::{
    AesCbcProcessor, BinaryListLoader, CryptoProcessor, DatedSource, DbFileInfo, DbFileWithDate,
    JsonListLoader, KeyMapper, StorageError, TableSource, KEY_LEN,
};

use super::entities::{Account, Category, Subcategory};
use super::record::{FinanceOperation, FinanceRecord};

/// Name of the folder holding the time buckets, relative to the database root.
pub const DATES_FOLDER: &str = "dates";

// ---------------------------------------------------------------------------
// DbConfiguration
// ---------------------------------------------------------------------------

/// Factory for the sources of one storage format.
pub trait DbConfiguration: Send + Sync {
    fn main_source(&self) -> Box<dyn DatedSource<FinanceRecord>>;
    fn accounts_source(&self) -> Box<dyn TableSource<Account>>;
    fn categories_source(&self) -> Box<dyn TableSource<Category>>;
    fn subcategories_source(&self) -> Box<dyn TableSource<Subcategory>>;

    /// Bucket folder relative to the database root.
    fn dates_folder(&self) -> &'static str {
        DATES_FOLDER
    }
}

/// Encrypted binary format keyed by the session's AES key.
#[derive(Clone)]
pub struct BinaryDbConfiguration {
    processor: Arc<dyn CryptoProcessor>,
}

impl BinaryDbConfiguration {
    #[must_use]
    pub fn new(aes_key: [u8; KEY_LEN]) -> Self {
        Self {
            processor: Arc::new(AesCbcProcessor::new(aes_key)),
        }
    }
}

impl DbConfiguration for BinaryDbConfiguration {
    fn main_source(&self) -> Box<dyn DatedSource<FinanceRecord>> {
        Box::new(BinaryDatedSource::new(
            Arc::clone(&self.processor),
            tsvault_core::MonthlyKeys,
        ))
    }

    fn accounts_source(&self) -> Box<dyn TableSource<Account>> {
        Box::new(BinaryListLoader::new(Some(Arc::clone(&self.processor))))
    }

    fn categories_source(&self) -> Box<dyn TableSource<Category>> {
        Box::new(BinaryListLoader::new(Some(Arc::clone(&self.processor))))
    }

    fn subcategories_source(&self) -> Box<dyn TableSource<Subcategory>> {
        Box::new(BinaryListLoader::new(Some(Arc::clone(&self.processor))))
    }
}

/// Plain JSON export format.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonDbConfiguration;

impl DbConfiguration for JsonDbConfiguration {
    fn main_source(&self) -> Box<dyn DatedSource<FinanceRecord>> {
        Box::new(JsonDatedSource::new(tsvault_core::MonthlyKeys))
    }

    fn accounts_source(&self) -> Box<dyn TableSource<Account>> {
        Box::new(JsonListLoader::new())
    }

    fn categories_source(&self) -> Box<dyn TableSource<Category>> {
        Box::new(JsonListLoader::new())
    }

    fn subcategories_source(&self) -> Box<dyn TableSource<Subcategory>> {
        Box::new(JsonListLoader::new())
    }
}

// ---------------------------------------------------------------------------
// BinaryDatedSource
// ---------------------------------------------------------------------------

/// One encrypted `<key>.bin` file per bucket.
pub struct BinaryDatedSource<M> {
    processor: Arc<dyn CryptoProcessor>,
    mapper: M,
}

impl<M: KeyMapper> BinaryDatedSource<M> {
    #[must_use]
    pub fn new(processor: Arc<dyn CryptoProcessor>, mapper: M) -> Self {
        Self { processor, mapper }
    }
}

impl<M: KeyMapper> DatedSource<FinanceRecord> for BinaryDatedSource<M> {
    fn load(&self, files: &[DbFileWithDate]) -> Result<FinanceRecord, StorageError> {
        match files.first() {
            Some(file) => read_binary(&file.path, Some(self.processor.as_ref())),
            None => Ok(FinanceRecord::default()),
        }
    }

    fn save(&self, value: &FinanceRecord, folder: &Path, key: i32) -> Result<(), StorageError> {
        write_binary(
            &folder.join(format!("{key}.bin")),
            value,
            Some(self.processor.as_ref()),
        )
    }

    fn date_of(&self, file: &DbFileInfo) -> Result<i32, StorageError> {
        let key = numeric_stem(&file.path)?;
        self.mapper
            .first_date(key)
            .ok_or_else(|| StorageError::InvalidFileName {
                path: file.path.clone(),
            })
    }

    fn file_names(&self, folder: &Path, key: i32) -> Result<Vec<DbFileWithDate>, StorageError> {
        let path = folder.join(format!("{key}.bin"));
        let date = self
            .mapper
            .first_date(key)
            .ok_or_else(|| StorageError::InvalidFileName { path: path.clone() })?;
        Ok(vec![DbFileWithDate::new(path, date)])
    }
}

// ---------------------------------------------------------------------------
// JsonDatedSource
// ---------------------------------------------------------------------------

/// Day folders named `yyyymmdd`, each holding JSON arrays of operations.
pub struct JsonDatedSource<M> {
    mapper: M,
}

impl<M: KeyMapper> JsonDatedSource<M> {
    #[must_use]
    pub fn new(mapper: M) -> Self {
        Self { mapper }
    }
}

impl<M: KeyMapper> DatedSource<FinanceRecord> for JsonDatedSource<M> {
    fn load(&self, files: &[DbFileWithDate]) -> Result<FinanceRecord, StorageError> {
        let mut operations = Vec::new();
        for file in files {
            let mut ops: Vec<FinanceOperation> = read_json_list(&file.path)?;
            for op in &mut ops {
                op.date = file.date;
            }
            operations.append(&mut ops);
        }
        Ok(FinanceRecord::from_operations(operations))
    }

    fn save(&self, _value: &FinanceRecord, _folder: &Path, _key: i32) -> Result<(), StorageError> {
        Err(StorageError::Unsupported("writing JSON records"))
    }

    fn date_of(&self, file: &DbFileInfo) -> Result<i32, StorageError> {
        file.folder
            .parse()
            .map_err(|_| StorageError::InvalidFileName {
                path: file.path.clone(),
            })
    }

    fn file_names(&self, folder: &Path, key: i32) -> Result<Vec<DbFileWithDate>, StorageError> {
        let mut files = Vec::new();
        if !folder.exists() {
            return Ok(files);
        }
        let mut days = Vec::new();
        for entry in fs::read_dir(folder).map_err(|e| StorageError::io(folder, e))? {
            let path = entry.map_err(|e| StorageError::io(folder, e))?.path();
            let date = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.parse::<i32>().ok());
            if let Some(date) = date.filter(|&d| path.is_dir() && self.mapper.key_of(d) == key) {
                days.push((date, path));
            }
        }
        days.sort();
        for (date, day) in days {
            let mut names = fs::read_dir(&day)
                .map_err(|e| StorageError::io(&day, e))?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::io(&day, e))?;
            names.retain(|p| p.extension().is_some_and(|ext| ext == "json"));
            names.sort();
            files.extend(names.into_iter().map(|p| DbFileWithDate::new(p, date)));
        }
        Ok(files)
    }
}
