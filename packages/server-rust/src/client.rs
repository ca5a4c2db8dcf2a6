//! Client side of the secure command protocol.
//!
//! Each call opens one TCP connection, sends one RSA-wrapped envelope, and
//! reads the AES-encrypted response until the server closes the socket.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use rand_core::{OsRng, RngCore};
use rsa::RsaPublicKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tsvault_core::crypto::aes_cbc_decrypt;
use tsvault_core::{BinaryData, ByteReader, CodecError, StorageError, IV_LEN};

use crate::db::{FinanceOperation, OperationId};
use crate::network::{Envelope, SESSION_KEY_LEN};
use crate::protocol::{decode_response, DbCommand, DictsResponse, OpsResponse, ProtocolError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("rsa wrap failed: {0}")]
    Rsa(#[from] rsa::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("response decryption failed: {0}")]
    Crypto(#[from] StorageError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("malformed response payload: {0}")]
    Codec(#[from] CodecError),
    #[error("server error: {0}")]
    Remote(String),
    #[error("server closed the connection without a response")]
    NoResponse,
    #[error("request timed out")]
    Timeout,
}

/// RSA-wraps `body` with the given session key and IV.
///
/// # Errors
///
/// Returns [`ClientError::Rsa`] when the body is too large for the key.
pub fn seal_request(
    public_key: &RsaPublicKey,
    session_key: [u8; SESSION_KEY_LEN],
    iv: [u8; IV_LEN],
    body: &[u8],
) -> Result<Vec<u8>, ClientError> {
    let envelope = Envelope {
        session_key,
        iv,
        body: body.to_vec(),
    };
    Ok(envelope.seal(public_key)?)
}

/// Decrypts a response and splits off its status.
///
/// # Errors
///
/// [`ClientError::NoResponse`] for an empty reply, [`ClientError::Remote`]
/// for an error status, or a decryption/framing error.
pub fn open_response(
    session_key: &[u8; SESSION_KEY_LEN],
    iv: &[u8; IV_LEN],
    ciphertext: &[u8],
) -> Result<Vec<u8>, ClientError> {
    if ciphertext.is_empty() {
        return Err(ClientError::NoResponse);
    }
    let plain = aes_cbc_decrypt(session_key, iv, ciphertext)?;
    decode_response(&plain)?.map_err(ClientError::Remote)
}

/// Sends `request` and reads until the server closes the connection.
///
/// # Errors
///
/// [`ClientError::Io`] on connection failures, [`ClientError::Timeout`]
/// when the whole exchange exceeds `timeout`.
pub async fn exchange(
    addr: SocketAddr,
    request: &[u8],
    timeout: Duration,
) -> Result<Vec<u8>, ClientError> {
    let round_trip = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(request).await?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        Ok::<_, io::Error>(response)
    };
    tokio::time::timeout(timeout, round_trip)
        .await
        .map_err(|_| ClientError::Timeout)?
        .map_err(ClientError::from)
}

/// Typed client bound to one server and one session key.
pub struct Client {
    addr: SocketAddr,
    public_key: RsaPublicKey,
    session_key: [u8; SESSION_KEY_LEN],
    timeout: Duration,
}

impl Client {
    /// Client with a fresh random session key.
    #[must_use]
    pub fn new(addr: SocketAddr, public_key: RsaPublicKey) -> Self {
        let mut session_key = [0u8; SESSION_KEY_LEN];
        OsRng.fill_bytes(&mut session_key);
        Self::with_session_key(addr, public_key, session_key)
    }

    /// Client reusing a known session key, as needed to reach a server
    /// whose session is already bound.
    #[must_use]
    pub fn with_session_key(
        addr: SocketAddr,
        public_key: RsaPublicKey,
        session_key: [u8; SESSION_KEY_LEN],
    ) -> Self {
        Self {
            addr,
            public_key,
            session_key,
            timeout: Duration::from_secs(10),
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sends one command with a fresh IV and returns the response payload.
    ///
    /// # Errors
    ///
    /// Any [`ClientError`]; a rejected handshake shows up as
    /// [`ClientError::NoResponse`].
    pub async fn send(&self, command: &DbCommand) -> Result<Vec<u8>, ClientError> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let request = seal_request(&self.public_key, self.session_key, iv, &command.encode())?;
        let response = exchange(self.addr, &request, self.timeout).await?;
        open_response(&self.session_key, &iv, &response)
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn dicts(&self) -> Result<DictsResponse, ClientError> {
        let payload = self.send(&DbCommand::Dicts).await?;
        Ok(DictsResponse::from_bytes(&payload)?)
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn get_ops(&self, date: i32) -> Result<OpsResponse, ClientError> {
        let payload = self.send(&DbCommand::GetOps { date }).await?;
        Ok(OpsResponse::from_bytes(&payload)?)
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn add_op(
        &self,
        date: i32,
        operation: FinanceOperation,
    ) -> Result<OperationId, ClientError> {
        let payload = self.send(&DbCommand::AddOp { date, operation }).await?;
        let mut reader = ByteReader::new(&payload);
        let id = reader.read_i32()?;
        if !reader.is_empty() {
            return Err(CodecError::InvalidLength.into());
        }
        Ok(id)
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn modify_op(
        &self,
        date: i32,
        id: OperationId,
        operation: FinanceOperation,
    ) -> Result<(), ClientError> {
        self.send(&DbCommand::ModifyOp {
            date,
            id,
            operation,
        })
        .await
        .map(drop)
    }

    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn delete_op(&self, date: i32, id: OperationId) -> Result<(), ClientError> {
        self.send(&DbCommand::DeleteOp { date, id }).await.map(drop)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.addr)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tsvault_core::crypto::aes_cbc_encrypt;

    use super::*;
    use crate::protocol::{encode_error, DbResponse};
    use crate::testing::rsa_key;

    const KEY: [u8; SESSION_KEY_LEN] = [4u8; SESSION_KEY_LEN];
    const IV: [u8; IV_LEN] = [5u8; IV_LEN];

    #[test]
    fn sealed_request_opens_on_server_side() {
        let key = rsa_key();
        let request = seal_request(&key.to_public_key(), KEY, IV, &DbCommand::Dicts.encode()).unwrap();
        let envelope = Envelope::open(key, &request).unwrap();
        assert_eq!(envelope.session_key, KEY);
        assert_eq!(envelope.iv, IV);
        assert_eq!(DbCommand::decode(&envelope.body).unwrap(), DbCommand::Dicts);
    }

    #[test]
    fn oversized_body_cannot_be_sealed() {
        let key = rsa_key();
        assert!(matches!(
            seal_request(&key.to_public_key(), KEY, IV, &[0u8; 400]),
            Err(ClientError::Rsa(_))
        ));
    }

    #[test]
    fn open_response_statuses() {
        let ok = aes_cbc_encrypt(&KEY, &IV, &DbResponse::Added(2).encode());
        assert_eq!(open_response(&KEY, &IV, &ok).unwrap(), 2_i32.to_le_bytes());

        let err = aes_cbc_encrypt(&KEY, &IV, &encode_error("unknown account 9"));
        assert!(matches!(
            open_response(&KEY, &IV, &err),
            Err(ClientError::Remote(message)) if message == "unknown account 9"
        ));

        assert!(matches!(open_response(&KEY, &IV, &[]), Err(ClientError::NoResponse)));
    }
}
