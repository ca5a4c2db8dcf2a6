//! Response payloads and the status-tagged response frame.

use bytes::BufMut;
use tsvault_core::{write_list, BinaryData, BufMutExt, ByteReader, CodecError};

use super::ProtocolError;
use crate::db::{Account, Category, FinanceOperation, OperationId, Subcategory};

pub const STATUS_OK: u8 = 0;
pub const STATUS_ERROR: u8 = 1;

/// All three dictionaries, in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DictsResponse {
    pub accounts: Vec<Account>,
    pub categories: Vec<Category>,
    pub subcategories: Vec<Subcategory>,
}

impl BinaryData for DictsResponse {
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            accounts: reader.read_list()?,
            categories: reader.read_list()?,
            subcategories: reader.read_list()?,
        })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        write_list(&self.accounts, out);
        write_list(&self.categories, out);
        write_list(&self.subcategories, out);
    }
}

/// Operations of one date, each with the id used to modify or delete it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpsResponse {
    pub operations: Vec<(OperationId, FinanceOperation)>,
}

impl BinaryData for OpsResponse {
    fn read_from(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        let count = reader.read_count()?;
        let mut operations = Vec::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            let id = reader.read_i32()?;
            operations.push((id, FinanceOperation::read_from(reader)?));
        }
        Ok(Self { operations })
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.put_count(self.operations.len());
        for (id, op) in &self.operations {
            out.put_i32_le(*id);
            op.write_to(out);
        }
    }
}

/// Successful result of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbResponse {
    Dicts(DictsResponse),
    Ops(OpsResponse),
    Added(OperationId),
    Done,
}

impl DbResponse {
    /// Status byte `0` followed by the payload.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![STATUS_OK];
        match self {
            Self::Dicts(dicts) => dicts.write_to(&mut out),
            Self::Ops(ops) => ops.write_to(&mut out),
            Self::Added(id) => out.put_i32_le(*id),
            Self::Done => {}
        }
        out
    }
}

/// Status byte `1` followed by the UTF-8 message.
#[must_use]
pub fn encode_error(message: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + message.len());
    out.put_u8(STATUS_ERROR);
    out.put_slice(message.as_bytes());
    out
}

/// Splits a response frame into the payload or the server's error message.
///
/// # Errors
///
/// Returns [`ProtocolError::Empty`] for an empty frame and
/// [`ProtocolError::UnknownStatus`] for a status other than `0`/`1`.
pub fn decode_response(bytes: &[u8]) -> Result<Result<Vec<u8>, String>, ProtocolError> {
    let (&status, payload) = bytes.split_first().ok_or(ProtocolError::Empty)?;
    match status {
        STATUS_OK => Ok(Ok(payload.to_vec())),
        STATUS_ERROR => Ok(Err(String::from_utf8_lossy(payload).into_owned())),
        other => Err(ProtocolError::UnknownStatus(other)),
    }
}
