// Cryptographic utilities for generating identifiers, tokens and sealed payloads

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose, Engine as _};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::{SessionError, SessionResult};

/// Nonce size for AES-256-GCM encryption (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Encryption key size for AES-256 (256 bits)
pub const ENCRYPTION_KEY_SIZE: usize = 32;

/// Entropy of session ids, correlation ids, CSRF state tokens and nonces (256 bits)
pub const TOKEN_BYTES: usize = 32;

/// Entropy of the PKCE code verifier (RFC 7636 allows 43-128 characters)
pub const CODE_VERIFIER_BYTES: usize = 48;

/// Generate `length` bytes from the thread-local CSPRNG, base64url encoded
///
/// `ThreadRng` is a ChaCha-based generator periodically reseeded from the OS.
#[must_use]
pub fn generate_token(length: usize) -> String {
    let mut bytes = vec![0u8; length];
    rand::rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Opaque, unguessable identifier for session and handshake records
#[must_use]
pub fn generate_id() -> String {
    generate_token(TOKEN_BYTES)
}

/// Generate a cryptographically secure CSRF state token (256 bits)
#[must_use]
pub fn generate_csrf_token() -> String {
    generate_token(TOKEN_BYTES)
}

/// Generate a cryptographically secure nonce (256 bits)
#[must_use]
pub fn generate_nonce() -> String {
    generate_token(TOKEN_BYTES)
}

/// Generate a PKCE code verifier (64 URL-safe characters)
#[must_use]
pub fn generate_code_verifier() -> String {
    generate_token(CODE_VERIFIER_BYTES)
}

/// Compute the S256 code challenge: `BASE64URL(SHA256(verifier))`
#[must_use]
pub fn code_challenge(verifier: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Compare two secrets without leaking the position of the first difference
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

/// Seal a payload with AES-256-GCM
///
/// Output layout is `nonce || ciphertext`.
///
/// # Errors
///
/// Returns an error if the key length is invalid or AES encryption fails
pub fn encrypt_bytes(plaintext: &[u8], key: &[u8]) -> SessionResult<Vec<u8>> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(SessionError::Serialization(format!(
            "Invalid key length: expected {ENCRYPTION_KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SessionError::Serialization(format!("AES encryption failed: {e}")))?;

    let mut combined = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    combined.extend_from_slice(&nonce_bytes);
    combined.extend_from_slice(&ciphertext);
    Ok(combined)
}

/// Open a payload sealed by [`encrypt_bytes`]
///
/// # Errors
///
/// Returns an error if:
/// - Key length is invalid
/// - Data is shorter than a nonce
/// - Authentication tag verification fails
pub fn decrypt_bytes(sealed: &[u8], key: &[u8]) -> SessionResult<Vec<u8>> {
    if key.len() != ENCRYPTION_KEY_SIZE {
        return Err(SessionError::Serialization(format!(
            "Invalid key length: expected {ENCRYPTION_KEY_SIZE} bytes, got {}",
            key.len()
        )));
    }

    if sealed.len() < NONCE_SIZE {
        return Err(SessionError::Serialization(
            "Invalid sealed payload length".to_string(),
        ));
    }

    let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_SIZE);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .map_err(|e| SessionError::Serialization(format!("AES decryption failed: {e}")))
}

/// Derive a 32-byte AES key from arbitrary secret material
///
/// SHA-256 of the input, so short configured secrets still fill the key.
#[must_use]
pub fn derive_encryption_key(input_key: &[u8]) -> [u8; ENCRYPTION_KEY_SIZE] {
    let mut encryption_key = [0u8; ENCRYPTION_KEY_SIZE];
    encryption_key.copy_from_slice(&Sha256::digest(input_key));
    encryption_key
}
