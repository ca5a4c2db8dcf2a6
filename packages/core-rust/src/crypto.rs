//! AES-256-CBC helpers for at-rest encryption and the response channel.
//!
//! At rest, every encrypted blob is laid out as `[iv: 16][ciphertext]` with
//! a fresh random IV per write and PKCS#7 padding.

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand_core::{OsRng, RngCore};

use crate::error::StorageError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES block / CBC IV length in bytes.
pub const IV_LEN: usize = 16;

/// Symmetric transform applied to whole files before they hit the disk.
pub trait CryptoProcessor: Send + Sync {
    /// Encrypts `data`; the output is self-describing (carries its IV).
    fn encrypt(&self, data: &[u8]) -> Vec<u8>;

    /// Reverses [`encrypt`](CryptoProcessor::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Crypto`] when the input is truncated or the
    /// padding does not check out (wrong key or corrupt file).
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError>;
}

/// Encrypts `data` with AES-256-CBC and PKCS#7 padding.
#[must_use]
pub fn aes_cbc_encrypt(key: &[u8; KEY_LEN], iv: &[u8; IV_LEN], data: &[u8]) -> Vec<u8> {
    Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(data)
}

/// Decrypts AES-256-CBC ciphertext and strips PKCS#7 padding.
///
/// # Errors
///
/// Returns [`StorageError::Crypto`] on a padding failure.
pub fn aes_cbc_decrypt(
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    data: &[u8],
) -> Result<Vec<u8>, StorageError> {
    Aes256CbcDec::new(key.into(), iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| StorageError::Crypto("bad padding".to_string()))
}

/// [`CryptoProcessor`] using AES-256-CBC with a random IV prefix.
#[derive(Clone)]
pub struct AesCbcProcessor {
    key: [u8; KEY_LEN],
}

impl AesCbcProcessor {
    #[must_use]
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }
}

// Keep key material out of logs.
impl std::fmt::Debug for AesCbcProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesCbcProcessor").finish_non_exhaustive()
    }
}

impl CryptoProcessor for AesCbcProcessor {
    fn encrypt(&self, data: &[u8]) -> Vec<u8> {
        let mut iv = [0u8; IV_LEN];
        OsRng.fill_bytes(&mut iv);
        let encrypted = aes_cbc_encrypt(&self.key, &iv, data);
        let mut out = Vec::with_capacity(IV_LEN + encrypted.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&encrypted);
        out
    }

    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        if data.len() < IV_LEN {
            return Err(StorageError::Crypto(format!(
                "encrypted blob of {} bytes is shorter than its iv",
                data.len()
            )));
        }
        let (iv, body) = data.split_at(IV_LEN);
        let mut iv_buf = [0u8; IV_LEN];
        iv_buf.copy_from_slice(iv);
        aes_cbc_decrypt(&self.key, &iv_buf, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processor_round_trip() {
        let processor = AesCbcProcessor::new([7u8; KEY_LEN]);
        let encrypted = processor.encrypt(b"ledger bucket");
        assert_eq!(encrypted.len(), IV_LEN + 16);
        assert_eq!(processor.decrypt(&encrypted).unwrap(), b"ledger bucket");
    }

    #[test]
    fn fresh_iv_per_encryption() {
        let processor = AesCbcProcessor::new([7u8; KEY_LEN]);
        let a = processor.encrypt(b"same");
        let b = processor.encrypt(b"same");
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_or_garbles() {
        let encrypted = AesCbcProcessor::new([1u8; KEY_LEN]).encrypt(b"secret payload");
        match AesCbcProcessor::new([2u8; KEY_LEN]).decrypt(&encrypted) {
            Ok(plain) => assert_ne!(plain, b"secret payload"),
            Err(e) => assert!(matches!(e, StorageError::Crypto(_))),
        }
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let processor = AesCbcProcessor::new([7u8; KEY_LEN]);
        assert!(matches!(
            processor.decrypt(&[0u8; 8]),
            Err(StorageError::Crypto(_))
        ));
    }

    #[test]
    fn empty_plaintext_pads_to_one_block() {
        let ct = aes_cbc_encrypt(&[0u8; KEY_LEN], &[0u8; IV_LEN], b"");
        assert_eq!(ct.len(), 16);
        assert!(aes_cbc_decrypt(&[0u8; KEY_LEN], &[0u8; IV_LEN], &ct)
            .unwrap()
            .is_empty());
    }
}
