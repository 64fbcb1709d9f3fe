//! Cryptogragic logics.
//!
//! Credentials are derived with a keyed HMAC-SHA256 where the key is the
//! process-wide salt. No per-user random salt is stored: the user id is mixed
//! into the digest instead, so identical passwords never share a hash.

use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

/// Random bytes mixed into every generated identifier.
const ENTROPY_LENGTH: usize = 16;

pub type Result<T> = std::result::Result<T, CryptoError>;

#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("user id is required to derive a credential")]
    MissingId,
    #[error("salt is required to derive a credential")]
    MissingSalt,
    #[error("at least one part and a non-zero length are required")]
    EmptyInput,
    #[error(transparent)]
    KeyLength(#[from] hmac::digest::InvalidLength),
}

fn keyed_digest(user_id: &str, password: &str, salt: &str) -> Result<HmacSha256> {
    if user_id.is_empty() {
        return Err(CryptoError::MissingId);
    }
    if salt.is_empty() {
        return Err(CryptoError::MissingSalt);
    }

    let mut mac = HmacSha256::new_from_slice(salt.as_bytes())?;
    mac.update(user_id.as_bytes());
    // separator keeps `id‖password` unambiguous.
    mac.update(&[0]);
    mac.update(password.as_bytes());

    Ok(mac)
}

/// Derive the stored credential of `password` for `user_id`.
pub fn hash(user_id: &str, password: &str, salt: &str) -> Result<String> {
    let mac = keyed_digest(user_id, password, salt)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check `password` against a stored credential.
///
/// Fails closed: an empty hash, an empty password or any derivation error
/// is a mismatch. Comparison runs in constant time.
pub fn verify(stored_hash: &str, user_id: &str, password: &str, salt: &str) -> bool {
    if stored_hash.is_empty() || password.is_empty() {
        return false;
    }

    let Ok(expected) = hex::decode(stored_hash) else {
        return false;
    };

    match keyed_digest(user_id, password, salt) {
        Ok(mac) => mac.verify_slice(&expected).is_ok(),
        Err(_) => false,
    }
}

/// Credential hasher bound to the process-wide salt.
#[derive(Clone)]
pub struct CredentialHasher {
    salt: String,
}

impl CredentialHasher {
    /// Create a new [`CredentialHasher`].
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    pub fn hash(&self, user_id: &str, password: &str) -> Result<String> {
        hash(user_id, password, &self.salt)
    }

    pub fn verify(&self, stored_hash: &str, user_id: &str, password: &str) -> bool {
        verify(stored_hash, user_id, password, &self.salt)
    }
}

impl std::fmt::Debug for CredentialHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialHasher")
            .field("salt", &"[REDACTED]")
            .finish()
    }
}

/// Compare two shared secrets without leaking where they differ.
///
/// Both sides are digested first so the comparison does not depend on
/// their lengths.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    if expected.is_empty() {
        return false;
    }

    let expected = Sha256::digest(expected.as_bytes());
    let provided = Sha256::digest(provided.as_bytes());
    expected
        .iter()
        .zip(provided.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Generate a hex identifier of `length` characters from `parts`.
///
/// Random bytes and the current time are mixed in, so two calls with the
/// same parts never return the same value.
pub fn generate_unique_hash(parts: &[&str], length: usize) -> Result<String> {
    if parts.is_empty() || length == 0 {
        return Err(CryptoError::EmptyInput);
    }

    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }

    let mut entropy = [0u8; ENTROPY_LENGTH];
    OsRng.fill_bytes(&mut entropy);
    hasher.update(entropy);

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    hasher.update(nanos.to_le_bytes());

    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(length);
    Ok(digest)
}
