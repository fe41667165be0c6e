//! Password-based key derivation (PBKDF2-HMAC-SHA-256)

use munkey_core::{Error, Result};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// PBKDF2 iteration count
pub const PBKDF2_ITERATIONS: u32 = 64_000;

/// Derived key size in bytes (AES-192)
pub const DERIVED_KEY_SIZE: usize = 24;

/// A zeroizing wrapper for derived AES-192 keys.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    bytes: [u8; DERIVED_KEY_SIZE],
}

impl VaultKey {
    /// Creates a key from raw bytes.
    ///
    /// # Errors
    /// Returns an error if the input is not exactly 24 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != DERIVED_KEY_SIZE {
            return Err(Error::Crypto(format!(
                "Invalid key length: expected {} bytes, got {}",
                DERIVED_KEY_SIZE,
                bytes.len()
            )));
        }

        let mut array = [0u8; DERIVED_KEY_SIZE];
        array.copy_from_slice(bytes);

        Ok(Self { bytes: array })
    }

    pub(crate) fn as_bytes(&self) -> &[u8; DERIVED_KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derives an AES-192 key from a password and salt.
///
/// PBKDF2-HMAC-SHA-256 with 64 000 iterations. The salt is caller-supplied;
/// the vault layer feeds the vault id bytes so every vault derives a
/// distinct key from the same password.
pub fn derive_key(password: &[u8], salt: &[u8]) -> VaultKey {
    let mut bytes = [0u8; DERIVED_KEY_SIZE];
    pbkdf2_hmac::<Sha256>(password, salt, PBKDF2_ITERATIONS, &mut bytes);
    VaultKey { bytes }
}
