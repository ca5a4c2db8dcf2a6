//! Ledger database: three dictionaries plus a monthly time-bucketed store.
//!
//! [`Db`] is synchronous and single-owner. The server shares it behind one
//! mutex and drives it from the blocking pool.

pub mod entities;
pub mod record;
pub mod sources;

use std::path::Path;

use tracing::{info, warn};
use tsvault_core::{
    DatedSource, KeyMapper, KeyedTable, MonthlyKeys, StorageError, TimeSeriesStore,
};

pub use entities::{Account, Category, OperationCode, Subcategory, SubcategoryCode};
pub use record::{FinOpProperty, FinanceOperation, FinanceRecord, PropertyCode};
pub use sources::{
    BinaryDatedSource, BinaryDbConfiguration, DbConfiguration, JsonDatedSource,
    JsonDbConfiguration, DATES_FOLDER,
};

use crate::protocol::{DictsResponse, OpsResponse};

/// Position of an operation inside its monthly bucket.
///
/// Ids are only stable until an earlier operation of the same month is
/// deleted.
pub type OperationId = i32;

/// Domain failures surfaced to clients as error responses.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("operation {id} not found for date {date}")]
    OperationNotFound { date: i32, id: OperationId },
    #[error("unknown account {0}")]
    UnknownAccount(i32),
    #[error("unknown subcategory {0}")]
    UnknownSubcategory(i32),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

type LedgerStore = TimeSeriesStore<FinanceRecord, Box<dyn DatedSource<FinanceRecord>>, MonthlyKeys>;

pub struct Db {
    store: LedgerStore,
    accounts: KeyedTable<Account>,
    categories: KeyedTable<Category>,
    subcategories: KeyedTable<Subcategory>,
}

impl Db {
    /// Opens the dictionaries under `data_folder` and prepares (but does not
    /// scan) the bucket store under `<data_folder>/dates`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Storage`] when a dictionary file cannot be read.
    pub fn open(
        data_folder: &Path,
        config: &dyn DbConfiguration,
        max_items: usize,
    ) -> Result<Self, DbError> {
        let mut accounts = KeyedTable::open("accounts", data_folder, config.accounts_source())?;
        resolve_cash_accounts(&mut accounts);
        let categories = KeyedTable::open("categories", data_folder, config.categories_source())?;
        let subcategories =
            KeyedTable::open("subcategories", data_folder, config.subcategories_source())?;
        let store = TimeSeriesStore::new(
            data_folder.join(config.dates_folder()),
            config.main_source(),
            MonthlyKeys,
            max_items,
        );
        info!(
            folder = %data_folder.display(),
            accounts = accounts.len(),
            categories = categories.len(),
            subcategories = subcategories.len(),
            "dictionaries loaded"
        );
        Ok(Self {
            store,
            accounts,
            categories,
            subcategories,
        })
    }

    /// Builds the bucket index without loading any bucket.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Storage`] when the dates folder cannot be scanned.
    pub fn init(&mut self) -> Result<usize, DbError> {
        Ok(self.store.init()?)
    }

    /// Loads every bucket.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Storage`] on the first unreadable bucket.
    pub fn load_all(&mut self) -> Result<usize, DbError> {
        Ok(self.store.load_all()?)
    }

    #[must_use]
    pub fn get_dicts(&self) -> DictsResponse {
        DictsResponse {
            accounts: self.accounts.iter().cloned().collect(),
            categories: self.categories.iter().cloned().collect(),
            subcategories: self.subcategories.iter().cloned().collect(),
        }
    }

    /// Operations dated exactly `date`, paired with their ids.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Storage`] when the bucket cannot be paged in.
    pub fn get_ops(&mut self, date: i32) -> Result<OpsResponse, DbError> {
        let operations = match self.store.load(date)? {
            Some(record) => record
                .operations
                .iter()
                .enumerate()
                .filter(|(_, op)| op.date == date)
                .map(|(index, op)| (operation_id(index), op.clone()))
                .collect(),
            None => Vec::new(),
        };
        Ok(OpsResponse { operations })
    }

    /// Appends `op` to the bucket of `date` (creating it if needed) and
    /// returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::UnknownAccount`] / [`DbError::UnknownSubcategory`]
    /// for dangling references, [`DbError::Storage`] on paging failures.
    pub fn add_op(&mut self, date: i32, mut op: FinanceOperation) -> Result<OperationId, DbError> {
        self.validate(&op)?;
        op.date = date;
        let record = self.store.load_or_add(date)?;
        record.operations.push(op);
        let id = operation_id(record.operations.len() - 1);
        let key = self.store.mapper().key_of(date);
        self.store.mark_as_modified(key);
        Ok(id)
    }

    /// Replaces operation `id` of `date`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::OperationNotFound`] when no operation with that id
    /// carries that date.
    pub fn modify_op(
        &mut self,
        date: i32,
        id: OperationId,
        mut op: FinanceOperation,
    ) -> Result<(), DbError> {
        self.validate(&op)?;
        op.date = date;
        let index = self.find_op(date, id)?;
        if let Some(record) = self.store.load(date)? {
            record.operations[index] = op;
        }
        let key = self.store.mapper().key_of(date);
        self.store.mark_as_modified(key);
        Ok(())
    }

    /// Removes operation `id` of `date`. Later operations of the same
    /// bucket shift down by one.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::OperationNotFound`] when no operation with that id
    /// carries that date.
    pub fn delete_op(&mut self, date: i32, id: OperationId) -> Result<(), DbError> {
        let index = self.find_op(date, id)?;
        if let Some(record) = self.store.load(date)? {
            record.operations.remove(index);
        }
        let key = self.store.mapper().key_of(date);
        self.store.mark_as_modified(key);
        Ok(())
    }

    /// Flushes dirty buckets and changed dictionaries. Returns the number of
    /// buckets written.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Storage`] on the first write failure.
    pub fn save(&mut self) -> Result<usize, DbError> {
        let written = self.store.save()?;
        self.accounts.save()?;
        self.categories.save()?;
        self.subcategories.save()?;
        Ok(written)
    }

    /// Writes the whole database into `data_folder` in the format of
    /// `config`. Only loaded buckets are written; call
    /// [`load_all`](Self::load_all) first with a large enough bound.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Storage`] on the first write failure.
    pub fn save_all(&mut self, config: &dyn DbConfiguration, data_folder: &Path) -> Result<usize, DbError> {
        self.accounts
            .save_all(config.accounts_source().as_ref(), data_folder)?;
        self.categories
            .save_all(config.categories_source().as_ref(), data_folder)?;
        self.subcategories
            .save_all(config.subcategories_source().as_ref(), data_folder)?;
        let target = config.main_source();
        let written = self
            .store
            .save_all(target.as_ref(), &data_folder.join(config.dates_folder()))?;
        Ok(written)
    }

    /// Number of buckets currently held in memory.
    #[must_use]
    pub fn active_items(&self) -> usize {
        self.store.active_items()
    }

    /// Number of known buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }

    fn validate(&self, op: &FinanceOperation) -> Result<(), DbError> {
        if !self.accounts.contains(op.account) {
            return Err(DbError::UnknownAccount(op.account));
        }
        if !self.subcategories.contains(op.subcategory) {
            return Err(DbError::UnknownSubcategory(op.subcategory));
        }
        Ok(())
    }

    fn find_op(&mut self, date: i32, id: OperationId) -> Result<usize, DbError> {
        let not_found = DbError::OperationNotFound { date, id };
        let Ok(index) = usize::try_from(id) else {
            return Err(not_found);
        };
        match self.store.load(date)? {
            Some(record) if record.operations.get(index).is_some_and(|op| op.date == date) => {
                Ok(index)
            }
            _ => Err(not_found),
        }
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("store", &self.store)
            .field("accounts", &self.accounts.len())
            .field("categories", &self.categories.len())
            .field("subcategories", &self.subcategories.len())
            .finish()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn operation_id(index: usize) -> OperationId {
    index as OperationId
}

/// Points every non-cash account freshly read from JSON at the cash
/// account of its currency.
fn resolve_cash_accounts(accounts: &mut KeyedTable<Account>) {
    let cash: Vec<(String, i32)> = accounts
        .iter()
        .filter(|a| a.is_cash())
        .map(|a| (a.currency.clone(), a.id))
        .collect();
    let mut changed = false;
    for account in accounts.iter_mut() {
        if account.cash_account != Some(0) {
            continue;
        }
        account.cash_account = cash
            .iter()
            .find(|(currency, _)| *currency == account.currency)
            .map(|&(_, id)| id);
        if account.cash_account.is_none() {
            warn!(account = account.id, currency = %account.currency, "no cash account for currency");
        }
        changed = true;
    }
    if changed {
        info!("cash accounts resolved");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tsvault_core::KEY_LEN;

    use super::*;

    const KEY: [u8; KEY_LEN] = [11u8; KEY_LEN];

    fn seed_json(root: &Path) {
        fs::write(
            root.join("accounts.json"),
            r#"[
                {"id":1,"name":"Cash UAH","valutaCode":"UAH","activeTo":null,"isCash":true},
                {"id":2,"name":"Card UAH","valutaCode":"UAH","activeTo":null,"isCash":false}
            ]"#,
        )
        .unwrap();
        fs::write(root.join("categories.json"), r#"[{"id":1,"name":"Car"}]"#).unwrap();
        fs::write(
            root.join("subcategories.json"),
            r#"[{"id":1,"name":"Fuel","code":"FUEL","operationCodeId":"EXPN","categoryId":1}]"#,
        )
        .unwrap();
        let day = root.join(DATES_FOLDER).join("20240115");
        fs::create_dir_all(&day).unwrap();
        fs::write(
            day.join("ops.json"),
            r#"[{"summa": 100.25, "subcategoryId": 1, "accountId": 2, "finOpProperies": null}]"#,
        )
        .unwrap();
    }

    fn op(account: i32, summa: i64) -> FinanceOperation {
        FinanceOperation {
            summa,
            subcategory: 1,
            account,
            ..FinanceOperation::default()
        }
    }

    /// Migrates a JSON fixture into an encrypted binary database and opens it.
    fn binary_db(max_items: usize) -> (tempfile::TempDir, Db) {
        let json = tempfile::tempdir().unwrap();
        seed_json(json.path());
        let bin = tempfile::tempdir().unwrap();

        let mut source = Db::open(json.path(), &JsonDbConfiguration, 1_000).unwrap();
        source.load_all().unwrap();
        source
            .save_all(&BinaryDbConfiguration::new(KEY), bin.path())
            .unwrap();

        let mut db = Db::open(bin.path(), &BinaryDbConfiguration::new(KEY), max_items).unwrap();
        db.init().unwrap();
        (bin, db)
    }

    #[test]
    fn json_accounts_resolve_cash_links() {
        let dir = tempfile::tempdir().unwrap();
        seed_json(dir.path());
        let db = Db::open(dir.path(), &JsonDbConfiguration, 10).unwrap();
        let dicts = db.get_dicts();
        assert_eq!(dicts.accounts[0].cash_account, None);
        assert_eq!(dicts.accounts[1].cash_account, Some(1));
    }

    #[test]
    fn migration_round_trip() {
        let (dir, mut db) = binary_db(4);
        assert!(dir.path().join("accounts.bin").exists());
        assert!(dir.path().join(DATES_FOLDER).join("202401.bin").exists());
        assert_eq!(db.bucket_count(), 1);

        let ops = db.get_ops(20_240_115).unwrap().operations;
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].0, 0);
        assert_eq!(ops[0].1.summa, 10_025);
        assert_eq!(ops[0].1.date, 20_240_115);
        assert_eq!(db.get_dicts().accounts.len(), 2);
    }

    #[test]
    fn get_ops_filters_by_exact_date() {
        let (_dir, mut db) = binary_db(4);
        assert!(db.get_ops(20_240_116).unwrap().operations.is_empty());
        assert!(db.get_ops(20_230_101).unwrap().operations.is_empty());
    }

    #[test]
    fn add_op_assigns_next_id_and_persists() {
        let (dir, mut db) = binary_db(4);
        let id = db.add_op(20_240_115, op(1, 500)).unwrap();
        assert_eq!(id, 1);
        let id = db.add_op(20_240_301, op(2, 700)).unwrap();
        assert_eq!(id, 0);
        assert_eq!(db.save().unwrap(), 2);

        let mut reopened = Db::open(dir.path(), &BinaryDbConfiguration::new(KEY), 4).unwrap();
        assert_eq!(reopened.init().unwrap(), 2);
        assert_eq!(reopened.get_ops(20_240_115).unwrap().operations.len(), 2);
        let march = reopened.get_ops(20_240_301).unwrap().operations;
        assert_eq!(march[0].1.summa, 700);
    }

    #[test]
    fn add_op_validates_references() {
        let (_dir, mut db) = binary_db(4);
        assert!(matches!(
            db.add_op(20_240_115, op(99, 1)),
            Err(DbError::UnknownAccount(99))
        ));
        let mut bad = op(1, 1);
        bad.subcategory = 42;
        assert!(matches!(
            db.add_op(20_240_115, bad),
            Err(DbError::UnknownSubcategory(42))
        ));
    }

    #[test]
    fn modify_and_delete_require_matching_date() {
        let (_dir, mut db) = binary_db(4);
        assert!(matches!(
            db.modify_op(20_240_116, 0, op(1, 1)),
            Err(DbError::OperationNotFound { date: 20_240_116, id: 0 })
        ));
        assert!(matches!(
            db.delete_op(20_240_115, 5),
            Err(DbError::OperationNotFound { .. })
        ));
        assert!(matches!(
            db.delete_op(20_240_115, -1),
            Err(DbError::OperationNotFound { .. })
        ));

        db.modify_op(20_240_115, 0, op(1, 42)).unwrap();
        assert_eq!(db.get_ops(20_240_115).unwrap().operations[0].1.summa, 42);
        db.delete_op(20_240_115, 0).unwrap();
        assert!(db.get_ops(20_240_115).unwrap().operations.is_empty());
    }

    #[test]
    fn fresh_folder_opens_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Db::open(dir.path(), &BinaryDbConfiguration::new(KEY), 2).unwrap();
        assert_eq!(db.init().unwrap(), 0);
        assert!(db.get_dicts().accounts.is_empty());
        assert!(db.get_ops(20_240_101).unwrap().operations.is_empty());
    }

    #[test]
    fn error_messages() {
        let err = DbError::OperationNotFound {
            date: 20_240_101,
            id: 3,
        };
        assert_eq!(err.to_string(), "operation 3 not found for date 20240101");
        assert_eq!(DbError::UnknownAccount(5).to_string(), "unknown account 5");
    }
}
