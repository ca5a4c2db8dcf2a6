//! Request decoding, encoding, and dispatch onto [`Db`].

use bytes::BufMut;
use tsvault_core::{BinaryData, ByteReader};

use super::response::DbResponse;
use super::ProtocolError;
use crate::db::{Db, DbError, FinanceOperation, OperationId};

/// First byte of every request body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    Dicts = 0,
    GetOps = 1,
    ModifyOp = 2,
    AddOp = 3,
    DeleteOp = 4,
}

impl TryFrom<u8> for CommandId {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            0 => Ok(Self::Dicts),
            1 => Ok(Self::GetOps),
            2 => Ok(Self::ModifyOp),
            3 => Ok(Self::AddOp),
            4 => Ok(Self::DeleteOp),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbCommand {
    Dicts,
    GetOps {
        date: i32,
    },
    ModifyOp {
        date: i32,
        id: OperationId,
        operation: FinanceOperation,
    },
    AddOp {
        date: i32,
        operation: FinanceOperation,
    },
    DeleteOp {
        date: i32,
        id: OperationId,
    },
}

impl DbCommand {
    #[must_use]
    pub fn id(&self) -> CommandId {
        match self {
            Self::Dicts => CommandId::Dicts,
            Self::GetOps { .. } => CommandId::GetOps,
            Self::ModifyOp { .. } => CommandId::ModifyOp,
            Self::AddOp { .. } => CommandId::AddOp,
            Self::DeleteOp { .. } => CommandId::DeleteOp,
        }
    }

    /// Parses a request body. The body must be consumed exactly.
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::Empty`] for an empty body
    /// - [`ProtocolError::UnknownCommand`] for an unassigned id byte
    /// - [`ProtocolError::WrongCommandSize`] for missing or trailing bytes
    /// - [`ProtocolError::Malformed`] for invalid field contents
    pub fn decode(body: &[u8]) -> Result<Self, ProtocolError> {
        let (&first, rest) = body.split_first().ok_or(ProtocolError::Empty)?;
        let mut reader = ByteReader::new(rest);
        let command = match CommandId::try_from(first)? {
            CommandId::Dicts => Self::Dicts,
            CommandId::GetOps => Self::GetOps {
                date: reader.read_i32()?,
            },
            CommandId::ModifyOp => Self::ModifyOp {
                date: reader.read_i32()?,
                id: reader.read_i32()?,
                operation: FinanceOperation::read_from(&mut reader)?,
            },
            CommandId::AddOp => Self::AddOp {
                date: reader.read_i32()?,
                operation: FinanceOperation::read_from(&mut reader)?,
            },
            CommandId::DeleteOp => Self::DeleteOp {
                date: reader.read_i32()?,
                id: reader.read_i32()?,
            },
        };
        if !reader.is_empty() {
            return Err(ProtocolError::WrongCommandSize);
        }
        Ok(command)
    }

    /// Serializes the request body, as a client sends it.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.id() as u8];
        match self {
            Self::Dicts => {}
            Self::GetOps { date } => out.put_i32_le(*date),
            Self::ModifyOp {
                date,
                id,
                operation,
            } => {
                out.put_i32_le(*date);
                out.put_i32_le(*id);
                operation.write_to(&mut out);
            }
            Self::AddOp { date, operation } => {
                out.put_i32_le(*date);
                operation.write_to(&mut out);
            }
            Self::DeleteOp { date, id } => {
                out.put_i32_le(*date);
                out.put_i32_le(*id);
            }
        }
        out
    }
}

/// Runs one command against the database.
///
/// # Errors
///
/// Propagates the [`DbError`] of the underlying operation.
pub fn execute(db: &mut Db, command: DbCommand) -> Result<DbResponse, DbError> {
    match command {
        DbCommand::Dicts => Ok(DbResponse::Dicts(db.get_dicts())),
        DbCommand::GetOps { date } => db.get_ops(date).map(DbResponse::Ops),
        DbCommand::ModifyOp {
            date,
            id,
            operation,
        } => db.modify_op(date, id, operation).map(|()| DbResponse::Done),
        DbCommand::AddOp { date, operation } => db.add_op(date, operation).map(DbResponse::Added),
        DbCommand::DeleteOp { date, id } => db.delete_op(date, id).map(|()| DbResponse::Done),
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn operation() -> FinanceOperation {
        FinanceOperation {
            date: 20_240_101,
            amount: Some(1_500),
            summa: 99_00,
            subcategory: 2,
            account: 3,
            properties: Vec::new(),
        }
    }

    #[test]
    fn get_ops_layout() {
        let bytes = DbCommand::GetOps { date: 20_240_101 }.encode();
        assert_eq!(bytes[0], CommandId::GetOps as u8);
        assert_eq!(&bytes[1..], &20_240_101_i32.to_le_bytes());
        assert_eq!(
            DbCommand::decode(&bytes).unwrap(),
            DbCommand::GetOps { date: 20_240_101 }
        );
    }

    #[test]
    fn every_command_decodes_its_own_encoding() {
        let commands = [
            DbCommand::Dicts,
            DbCommand::ModifyOp {
                date: 20_240_102,
                id: 4,
                operation: operation(),
            },
            DbCommand::AddOp {
                date: 20_240_102,
                operation: operation(),
            },
            DbCommand::DeleteOp {
                date: 20_240_102,
                id: 1,
            },
        ];
        for command in commands {
            assert_eq!(DbCommand::decode(&command.encode()).unwrap(), command);
        }
    }

    #[test]
    fn short_add_op_is_wrong_size() {
        let bytes = DbCommand::AddOp {
            date: 20_240_101,
            operation: operation(),
        }
        .encode();
        assert_eq!(
            DbCommand::decode(&bytes[..bytes.len() - 3]),
            Err(ProtocolError::WrongCommandSize)
        );
    }

    #[test]
    fn add_op_without_record_is_wrong_size() {
        let mut bytes = vec![CommandId::AddOp as u8];
        bytes.extend_from_slice(&20_240_101_i32.to_le_bytes());
        assert_eq!(DbCommand::decode(&bytes), Err(ProtocolError::WrongCommandSize));
    }

    #[test]
    fn trailing_bytes_are_wrong_size() {
        let mut bytes = DbCommand::Dicts.encode();
        bytes.push(0);
        assert_eq!(DbCommand::decode(&bytes), Err(ProtocolError::WrongCommandSize));

        let mut bytes = DbCommand::DeleteOp { date: 1, id: 2 }.encode();
        bytes.push(0);
        assert_eq!(DbCommand::decode(&bytes), Err(ProtocolError::WrongCommandSize));
    }

    #[test]
    fn unknown_and_empty() {
        assert_eq!(DbCommand::decode(&[]), Err(ProtocolError::Empty));
        assert_eq!(DbCommand::decode(&[5]), Err(ProtocolError::UnknownCommand(5)));
        assert_eq!(CommandId::try_from(255), Err(ProtocolError::UnknownCommand(255)));
    }

    proptest! {
        #[test]
        fn decode_never_panics(body in proptest::collection::vec(any::<u8>(), 0..128)) {
            let _ = DbCommand::decode(&body);
        }
    }
}
