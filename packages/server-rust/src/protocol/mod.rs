//! Binary command protocol spoken inside the secure envelope.
//!
//! A request body is one command-id byte followed by little-endian fields.
//! A response is a status byte (`0` ok, `1` error) followed by the payload
//! or a UTF-8 error message.

pub mod command;
pub mod response;

use tsvault_core::CodecError;

pub use command::{execute, CommandId, DbCommand};
pub use response::{
    decode_response, encode_error, DbResponse, DictsResponse, OpsResponse, STATUS_ERROR,
    STATUS_OK,
};

/// Malformed request or response bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty database command")]
    Empty,
    #[error("unknown database command {0}")]
    UnknownCommand(u8),
    #[error("wrong database command length")]
    WrongCommandSize,
    #[error("malformed database command: {0}")]
    Malformed(CodecError),
    #[error("unknown response status {0}")]
    UnknownStatus(u8),
}

impl From<CodecError> for ProtocolError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::UnexpectedEof { .. } | CodecError::InvalidLength => Self::WrongCommandSize,
            other => Self::Malformed(other),
        }
    }
}
