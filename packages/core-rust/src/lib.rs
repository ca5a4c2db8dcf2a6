//! `tsvault` Core: binary codec, at-rest crypto, and the time-bucketed
//! LRU store with its file-source contract.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod eviction;
pub mod loaders;
pub mod source;
pub mod store;
pub mod table;

pub use codec::{write_list, BinaryData, BufMutExt, ByteReader};
pub use crypto::{AesCbcProcessor, CryptoProcessor, IV_LEN, KEY_LEN};
pub use error::{CodecError, StorageError};
pub use eviction::{EvictionList, SlotId};
pub use loaders::{read_binary, write_binary, BinaryListLoader, JsonListLoader};
pub use source::{DailyKeys, DatedSource, DbFileInfo, DbFileWithDate, KeyMapper, MonthlyKeys};
pub use store::TimeSeriesStore;
pub use table::{Identifiable, KeyedTable, TableSource};
