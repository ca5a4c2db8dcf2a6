//! Secure envelope: the single RSA-wrapped round trip of every connection.
//!
//! Request plaintext, after RSA-PKCS#1 v1.5 unwrapping:
//!
//! ```text
//! [session key: 32][iv: 16][body: >= 1][sha256(session key | iv | body): 32]
//! ```
//!
//! The response is the handler output encrypted with AES-256-CBC under the
//! session key and the client's IV. It carries no integrity tag.

use rand_core::OsRng;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tsvault_core::crypto::aes_cbc_encrypt;
use tsvault_core::{IV_LEN, KEY_LEN};

use crate::db::DbError;

pub const SESSION_KEY_LEN: usize = KEY_LEN;
pub const HASH_LEN: usize = 32;
pub const MIN_ENVELOPE_LEN: usize = SESSION_KEY_LEN + IV_LEN + 1 + HASH_LEN;

/// Failures of the handshake. None of them produce a response.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("rsa unwrap failed: {0}")]
    Crypto(#[from] rsa::Error),
    #[error("envelope of {0} bytes is too short")]
    TooShort(usize),
    #[error("envelope hash mismatch")]
    Integrity,
    #[error("session key does not match the bound session")]
    SessionMismatch,
    #[error("database initialisation failed: {0}")]
    DbInit(#[source] DbError),
}

impl ChannelError {
    /// The server cannot keep running after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DbInit(_))
    }
}

/// Unwrapped request.
#[derive(Clone, PartialEq, Eq)]
pub struct Envelope {
    pub session_key: [u8; SESSION_KEY_LEN],
    pub iv: [u8; IV_LEN],
    pub body: Vec<u8>,
}

impl std::fmt::Debug for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Envelope")
            .field("body_len", &self.body.len())
            .finish_non_exhaustive()
    }
}

impl Envelope {
    /// Serializes the envelope and appends its SHA-256 trailer.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(SESSION_KEY_LEN + IV_LEN + self.body.len() + HASH_LEN);
        out.extend_from_slice(&self.session_key);
        out.extend_from_slice(&self.iv);
        out.extend_from_slice(&self.body);
        let digest = Sha256::digest(&out);
        out.extend_from_slice(&digest);
        out
    }

    /// Parses and integrity-checks unwrapped envelope bytes.
    ///
    /// # Errors
    ///
    /// [`ChannelError::TooShort`] below [`MIN_ENVELOPE_LEN`] bytes,
    /// [`ChannelError::Integrity`] when the trailer does not match.
    pub fn parse(plain: &[u8]) -> Result<Self, ChannelError> {
        if plain.len() < MIN_ENVELOPE_LEN {
            return Err(ChannelError::TooShort(plain.len()));
        }
        let (signed, hash) = plain.split_at(plain.len() - HASH_LEN);
        let digest = Sha256::digest(signed);
        if !bool::from(digest.as_slice().ct_eq(hash)) {
            return Err(ChannelError::Integrity);
        }

        let (key, rest) = signed.split_at(SESSION_KEY_LEN);
        let (iv, body) = rest.split_at(IV_LEN);
        let mut session_key = [0u8; SESSION_KEY_LEN];
        session_key.copy_from_slice(key);
        let mut iv_buf = [0u8; IV_LEN];
        iv_buf.copy_from_slice(iv);
        Ok(Self {
            session_key,
            iv: iv_buf,
            body: body.to_vec(),
        })
    }

    /// RSA-unwraps and parses a request.
    ///
    /// # Errors
    ///
    /// [`ChannelError::Crypto`] when the ciphertext does not decrypt under
    /// `private_key`, plus the errors of [`parse`](Self::parse).
    pub fn open(private_key: &RsaPrivateKey, ciphertext: &[u8]) -> Result<Self, ChannelError> {
        let plain = private_key.decrypt(Pkcs1v15Encrypt, ciphertext)?;
        Self::parse(&plain)
    }

    /// RSA-wraps the envelope for `public_key`. PKCS#1 v1.5 limits the
    /// body to the modulus size minus 91 bytes.
    ///
    /// # Errors
    ///
    /// Returns `rsa::Error::MessageTooLong` for an oversized body.
    pub fn seal(&self, public_key: &RsaPublicKey) -> Result<Vec<u8>, rsa::Error> {
        public_key.encrypt(&mut OsRng, Pkcs1v15Encrypt, &self.to_bytes())
    }

    /// Encrypts a response for the sender of this envelope.
    #[must_use]
    pub fn seal_response(&self, response: &[u8]) -> Vec<u8> {
        aes_cbc_encrypt(&self.session_key, &self.iv, response)
    }
}

/// Turns a request body into response bytes for a verified session key.
pub trait PacketHandler: Send + Sync + 'static {
    /// # Errors
    ///
    /// A [`ChannelError`] drops the connection without a response.
    fn handle(
        &self,
        session_key: &[u8; SESSION_KEY_LEN],
        body: &[u8],
    ) -> Result<Vec<u8>, ChannelError>;
}

/// Full server-side round trip: unwrap, verify, handle, encrypt.
///
/// # Errors
///
/// Any [`ChannelError`]; the caller writes nothing back.
pub fn process_packet(
    private_key: &RsaPrivateKey,
    handler: &dyn PacketHandler,
    ciphertext: &[u8],
) -> Result<Vec<u8>, ChannelError> {
    let envelope = Envelope::open(private_key, ciphertext)?;
    let response = handler.handle(&envelope.session_key, &envelope.body)?;
    Ok(envelope.seal_response(&response))
}

#[cfg(test)]
mod tests {
    use tsvault_core::crypto::aes_cbc_decrypt;

    use super::*;
    use crate::testing::rsa_key;

    struct Echo;

    impl PacketHandler for Echo {
        fn handle(&self, _key: &[u8; SESSION_KEY_LEN], body: &[u8]) -> Result<Vec<u8>, ChannelError> {
            Ok(body.to_vec())
        }
    }

    fn envelope(body: &[u8]) -> Envelope {
        Envelope {
            session_key: [5u8; SESSION_KEY_LEN],
            iv: [6u8; IV_LEN],
            body: body.to_vec(),
        }
    }

    #[test]
    fn envelope_layout() {
        let bytes = envelope(b"x").to_bytes();
        assert_eq!(bytes.len(), MIN_ENVELOPE_LEN);
        assert_eq!(&bytes[..SESSION_KEY_LEN], &[5u8; SESSION_KEY_LEN]);
        assert_eq!(bytes[SESSION_KEY_LEN + IV_LEN], b'x');
        assert_eq!(Envelope::parse(&bytes).unwrap(), envelope(b"x"));
    }

    #[test]
    fn short_envelope_is_rejected() {
        let bytes = envelope(b"x").to_bytes();
        assert!(matches!(
            Envelope::parse(&bytes[1..]),
            Err(ChannelError::TooShort(80))
        ));
    }

    #[test]
    fn tampered_body_or_hash_fails_integrity() {
        let mut bytes = envelope(b"abc").to_bytes();
        bytes[SESSION_KEY_LEN + IV_LEN] ^= 1;
        assert!(matches!(Envelope::parse(&bytes), Err(ChannelError::Integrity)));

        let mut bytes = envelope(b"abc").to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x80;
        assert!(matches!(Envelope::parse(&bytes), Err(ChannelError::Integrity)));
    }

    #[test]
    fn process_packet_round_trip() {
        let key = rsa_key();
        let request = envelope(b"ping");
        let ciphertext = request.seal(&key.to_public_key()).unwrap();

        let response = process_packet(key, &Echo, &ciphertext).unwrap();
        let plain = aes_cbc_decrypt(&request.session_key, &request.iv, &response).unwrap();
        assert_eq!(plain, b"ping");
    }

    #[test]
    fn garbage_ciphertext_is_crypto_error() {
        let key = rsa_key();
        assert!(matches!(
            process_packet(key, &Echo, &[0u8; 256]),
            Err(ChannelError::Crypto(_))
        ));
    }

    #[test]
    fn only_db_init_is_fatal() {
        assert!(!ChannelError::Integrity.is_fatal());
        assert!(ChannelError::DbInit(DbError::UnknownAccount(1)).is_fatal());
    }
}
