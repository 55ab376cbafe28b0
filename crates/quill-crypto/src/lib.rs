//! Field-level encryption at rest.
//! AES-256-GCM envelopes (`nonce || tag || ciphertext`, base64) with a key
//! loaded once from the environment (or a test double).

pub mod cipher;
pub mod key_provider;

pub use cipher::{decrypt, encrypt, CryptoError, FieldCipher, NONCE_LEN, TAG_LEN};
pub use key_provider::{
    EnvKeyProvider, FieldKey, KeyError, KeyProvider, StaticKeyProvider, ENCRYPTION_KEY_ENV,
};
