//! Record encoding
//!
//! Records become field-named JSON. With a payload key configured, the JSON
//! is sealed with AES-256-GCM so that provider tokens are not readable by
//! anyone with access to the cache.

use serde::{de::DeserializeOwned, Serialize};

use crate::error::SessionResult;
use crate::utils::crypto::{decrypt_bytes, derive_encryption_key, encrypt_bytes, ENCRYPTION_KEY_SIZE};

#[derive(Clone, Default)]
pub struct RecordCodec {
    key: Option<[u8; ENCRYPTION_KEY_SIZE]>,
}

impl std::fmt::Debug for RecordCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordCodec")
            .field("sealed", &self.key.is_some())
            .finish()
    }
}

impl RecordCodec {
    /// Plain JSON payloads
    #[must_use]
    pub const fn plain() -> Self {
        Self { key: None }
    }

    /// JSON payloads sealed with a key derived from `secret`
    #[must_use]
    pub fn sealed(secret: &[u8]) -> Self {
        Self {
            key: Some(derive_encryption_key(secret)),
        }
    }

    #[must_use]
    pub const fn is_sealed(&self) -> bool {
        self.key.is_some()
    }

    /// # Errors
    ///
    /// Returns `SessionError::Serialization` if serialization or sealing fails
    pub fn encode<T: Serialize>(&self, record: &T) -> SessionResult<Vec<u8>> {
        let json = serde_json::to_vec(record)?;
        match &self.key {
            Some(key) => encrypt_bytes(&json, key),
            None => Ok(json),
        }
    }

    /// # Errors
    ///
    /// Returns `SessionError::Serialization` if the payload cannot be opened or parsed
    pub fn decode<T: DeserializeOwned>(&self, payload: &[u8]) -> SessionResult<T> {
        match &self.key {
            Some(key) => Ok(serde_json::from_slice(&decrypt_bytes(payload, key)?)?),
            None => Ok(serde_json::from_slice(payload)?),
        }
    }
}
