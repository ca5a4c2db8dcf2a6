//! Shared fixtures for unit tests.

use std::path::Path;
use std::sync::OnceLock;

use rand_core::OsRng;
use rsa::RsaPrivateKey;
use tsvault_core::KEY_LEN;

use crate::db::{Account, BinaryDbConfiguration, Category, DbConfiguration, OperationCode, Subcategory};

/// One 2048-bit key per test binary; generation is slow.
pub(crate) fn rsa_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).expect("generate rsa key"))
}

/// Writes encrypted dictionaries with account 1 and subcategory 1.
pub(crate) fn seed_dictionaries(folder: &Path, key: [u8; KEY_LEN]) {
    let config = BinaryDbConfiguration::new(key);
    config
        .accounts_source()
        .save(
            &[Account {
                id: 1,
                name: "Cash".into(),
                currency: "UAH".into(),
                active_to: None,
                cash_account: None,
            }],
            &folder.join("accounts.bin"),
        )
        .unwrap();
    config
        .categories_source()
        .save(
            &[Category {
                id: 1,
                name: "Food".into(),
            }],
            &folder.join("categories.bin"),
        )
        .unwrap();
    config
        .subcategories_source()
        .save(
            &[Subcategory {
                id: 1,
                name: "Groceries".into(),
                code: None,
                operation_code: OperationCode::Expn,
                category: 1,
            }],
            &folder.join("subcategories.bin"),
        )
        .unwrap();
}
