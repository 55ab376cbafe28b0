//! Field-level encryption for API handlers.
//!
//! Every helper returns `Result<_, ApiError>` so handlers can `?` straight to
//! a response. Failures are reported with an operation tag only.

use std::sync::Arc;

use quill_core::observability::{ErrorReporter, ReportContext};
use quill_crypto::{CryptoError, FieldCipher};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::ApiError;

#[derive(Clone)]
pub struct FieldCodec {
    cipher: FieldCipher,
    reporter: Arc<dyn ErrorReporter>,
}

impl FieldCodec {
    pub fn new(cipher: FieldCipher, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self { cipher, reporter }
    }

    /// Encrypt a raw string field into an envelope.
    pub fn encrypt_field(&self, data: &str) -> Result<String, ApiError> {
        self.cipher.encrypt(data).map_err(|err| {
            self.report(&err, "encrypt_field", "cipher");
            ApiError::Encryption
        })
    }

    /// Stringify `value` as JSON, then encrypt it.
    pub fn encrypt_json_field<T: Serialize + ?Sized>(&self, value: &T) -> Result<String, ApiError> {
        let json = serde_json::to_string(value).map_err(|err| {
            self.report(&err, "encrypt_field", "serialize");
            ApiError::Encryption
        })?;
        self.encrypt_field(&json)
    }

    /// Decrypt an envelope back into the stored string.
    pub fn decrypt_field(&self, encrypted: &str) -> Result<String, ApiError> {
        self.cipher.decrypt(encrypted).map_err(|err| {
            self.report(&err, "decrypt_field", crypto_stage(&err));
            ApiError::DataUnavailable
        })
    }

    /// Decrypt then JSON-parse. A parse failure maps to the same error as a
    /// decryption failure.
    pub fn decrypt_json_field<T: DeserializeOwned>(&self, encrypted: &str) -> Result<T, ApiError> {
        let plaintext = self.decrypt_field(encrypted)?;
        serde_json::from_str(&plaintext).map_err(|err| {
            // serde_json errors quote no input, only line/column.
            self.report(&err, "decrypt_field", "parse");
            ApiError::DataUnavailable
        })
    }

    fn report(&self, err: &(dyn std::error::Error + 'static), operation: &str, stage: &str) {
        self.reporter.capture_exception(
            err,
            &ReportContext::operation(operation)
                .tag("component", "field_crypto")
                .extra("stage", stage),
        );
    }
}

fn crypto_stage(err: &CryptoError) -> &'static str {
    match err {
        CryptoError::Key(_) => "key",
        CryptoError::Encoding => "encoding",
        CryptoError::Truncated { .. } => "truncated",
        CryptoError::Authentication => "authentication",
        CryptoError::Utf8 => "utf8",
        CryptoError::Encrypt => "cipher",
    }
}
