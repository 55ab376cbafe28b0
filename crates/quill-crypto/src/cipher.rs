use std::{fmt, sync::Arc};

use aes_gcm::{
    aead::{AeadCore, AeadInPlace, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce, Tag,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;
use tracing::debug;

use crate::key_provider::{FieldKey, KeyError, KeyProvider};

/// AES-GCM nonce length (96 bit).
pub const NONCE_LEN: usize = 12;
/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// Why a field could not be encrypted or decrypted. Messages never include
/// plaintext, ciphertext or key bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("envelope is not valid base64")]
    Encoding,
    #[error("envelope too short: {len} bytes")]
    Truncated { len: usize },
    #[error("authentication failed")]
    Authentication,
    #[error("decrypted field is not valid UTF-8")]
    Utf8,
    #[error("encryption failed")]
    Encrypt,
}

/// Encrypt `plaintext` under `key` into a base64 `nonce || tag || ciphertext`
/// envelope. A fresh random nonce is drawn on every call.
pub fn encrypt(plaintext: &str, key: &FieldKey) -> Result<String, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let mut buffer = plaintext.as_bytes().to_vec();
    let tag = cipher
        .encrypt_in_place_detached(&nonce, b"", &mut buffer)
        .map_err(|_| CryptoError::Encrypt)?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + TAG_LEN + buffer.len());
    envelope.extend_from_slice(nonce.as_slice());
    envelope.extend_from_slice(tag.as_slice());
    envelope.extend_from_slice(&buffer);

    Ok(STANDARD.encode(envelope))
}

/// Decrypt an envelope produced by [`encrypt`]. Fails closed: nothing is
/// returned unless the tag verifies.
pub fn decrypt(envelope: &str, key: &FieldKey) -> Result<String, CryptoError> {
    let mut combined = STANDARD
        .decode(envelope.trim())
        .map_err(|_| CryptoError::Encoding)?;

    if combined.len() < NONCE_LEN + TAG_LEN {
        debug!(len = combined.len(), "rejecting short envelope");
        return Err(CryptoError::Truncated {
            len: combined.len(),
        });
    }

    let mut ciphertext = combined.split_off(NONCE_LEN + TAG_LEN);
    let nonce = Nonce::from_slice(&combined[..NONCE_LEN]);
    let tag = Tag::from_slice(&combined[NONCE_LEN..]);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt_in_place_detached(nonce, b"", &mut ciphertext, tag)
        .map_err(|_| CryptoError::Authentication)?;

    String::from_utf8(ciphertext).map_err(|_| CryptoError::Utf8)
}

/// Field cipher bound to a key loaded once at startup; cheap to clone.
#[derive(Clone)]
pub struct FieldCipher {
    key: Arc<FieldKey>,
}

impl FieldCipher {
    pub fn new(key: FieldKey) -> Self {
        Self { key: Arc::new(key) }
    }

    /// Load the key from `provider`; a missing or malformed key is fatal.
    pub fn from_provider<P: KeyProvider + ?Sized>(provider: &P) -> Result<Self, KeyError> {
        provider.load().map(Self::new)
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        encrypt(plaintext, &self.key)
    }

    pub fn decrypt(&self, envelope: &str) -> Result<String, CryptoError> {
        decrypt(envelope, &self.key)
    }
}

impl fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}
