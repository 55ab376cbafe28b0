use std::fmt;

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

/// Environment variable holding the base64-encoded field key.
pub const ENCRYPTION_KEY_ENV: &str = "QUILL_ENCRYPTION_KEY";

pub const KEY_LEN: usize = 32;

/// 256-bit symmetric key used for field encryption. Never log key bytes.
#[derive(Clone, PartialEq, Eq)]
pub struct FieldKey {
    bytes: [u8; KEY_LEN],
}

impl FieldKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Decode a standard base64 key; anything but exactly 32 bytes is rejected.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let encoded = encoded.trim();
        if encoded.is_empty() {
            return Err(KeyError::Missing);
        }

        let bytes = general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| KeyError::Decode(e.to_string()))?;

        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| KeyError::Length { actual: b.len() })?;
        Ok(Self { bytes })
    }

    /// Fresh key from the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn to_base64(&self) -> String {
        general_purpose::STANDARD.encode(self.bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FieldKey(<redacted>)")
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    #[error("encryption key is not configured")]
    Missing,
    #[error("encryption key is not valid base64: {0}")]
    Decode(String),
    #[error("encryption key must be {KEY_LEN} bytes, got {actual}")]
    Length { actual: usize },
}

/// Provides the field key (environment in production; static in tests).
pub trait KeyProvider: Send + Sync {
    fn load(&self) -> Result<FieldKey, KeyError>;
}

/// Reads the key from an environment variable on each `load`.
#[derive(Debug, Clone)]
pub struct EnvKeyProvider {
    var: String,
}

impl EnvKeyProvider {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl Default for EnvKeyProvider {
    fn default() -> Self {
        Self::new(ENCRYPTION_KEY_ENV)
    }
}

impl KeyProvider for EnvKeyProvider {
    fn load(&self) -> Result<FieldKey, KeyError> {
        match std::env::var(&self.var) {
            Ok(value) => FieldKey::from_base64(&value),
            Err(_) => Err(KeyError::Missing),
        }
    }
}

/// Key supplied directly: from the config file, or a test key.
#[derive(Debug, Clone)]
pub struct StaticKeyProvider {
    encoded: Option<String>,
}

impl StaticKeyProvider {
    pub fn new(encoded: Option<String>) -> Self {
        Self { encoded }
    }

    pub fn from_key(key: &FieldKey) -> Self {
        Self::new(Some(key.to_base64()))
    }
}

impl KeyProvider for StaticKeyProvider {
    fn load(&self) -> Result<FieldKey, KeyError> {
        match &self.encoded {
            Some(encoded) => FieldKey::from_base64(encoded),
            None => Err(KeyError::Missing),
        }
    }
}
