//! Key files: the at-rest AES key and the server's RSA private key.

use std::fs;
use std::path::{Path, PathBuf};

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use tsvault_core::KEY_LEN;

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("cannot read key file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("AES key file {} must hold {KEY_LEN} raw bytes or {} hex digits", path.display(), KEY_LEN * 2)]
    AesKey { path: PathBuf },
    #[error("RSA key file {} is neither PKCS#8 nor PKCS#1 PEM", path.display())]
    RsaKey { path: PathBuf },
}

/// Reads a 32-byte AES key stored raw or as 64 hex digits.
///
/// # Errors
///
/// Returns [`KeyError::Io`] for an unreadable file and [`KeyError::AesKey`]
/// for any other content.
pub fn load_aes_key(path: &Path) -> Result<[u8; KEY_LEN], KeyError> {
    let bytes = fs::read(path).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let invalid = || KeyError::AesKey {
        path: path.to_path_buf(),
    };
    if let Ok(key) = <[u8; KEY_LEN]>::try_from(bytes.as_slice()) {
        return Ok(key);
    }
    let text = std::str::from_utf8(&bytes).map_err(|_| invalid())?.trim();
    let mut key = [0u8; KEY_LEN];
    hex::decode_to_slice(text, &mut key).map_err(|_| invalid())?;
    Ok(key)
}

/// Reads a PEM-encoded RSA private key, PKCS#8 or PKCS#1.
///
/// # Errors
///
/// Returns [`KeyError::Io`] for an unreadable file and [`KeyError::RsaKey`]
/// when neither encoding parses.
pub fn load_rsa_private_key(path: &Path) -> Result<RsaPrivateKey, KeyError> {
    let pem = fs::read_to_string(path).map_err(|source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
        .map_err(|_| KeyError::RsaKey {
            path: path.to_path_buf(),
        })
}
