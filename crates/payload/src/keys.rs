//! Vault signing identity
//!
//! Each vault is keyed by an Ed25519 pair. The verifying half, SPKI-DER
//! encoded and base64url'd without padding, *is* the vault id; the signing
//! half travels inside the encrypted payload so any node that can decrypt
//! the vault can also re-sign it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use munkey_core::{Error, Result, VaultId};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// A vault's Ed25519 keypair.
pub struct VaultKeys {
    signing: SigningKey,
}

impl VaultKeys {
    /// Generates a fresh keypair from OS randomness.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restores a keypair from the PKCS#8 DER stored inside a decrypted
    /// payload body.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        let signing = SigningKey::from_pkcs8_der(der)
            .map_err(|e| Error::Crypto(format!("Invalid private key: {}", e)))?;
        Ok(Self { signing })
    }

    /// The vault id derived from the verifying key.
    pub fn vault_id(&self) -> Result<VaultId> {
        encode_vault_id(&self.signing.verifying_key())
    }

    /// PKCS#8 DER of the signing key, for embedding in the payload body.
    pub fn private_key_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let doc = self
            .signing
            .to_pkcs8_der()
            .map_err(|e| Error::Crypto(format!("Private key encoding failed: {}", e)))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    /// Signs `message` (Ed25519 hashes it with SHA-512 internally).
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing.sign(message)
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }
}

impl std::fmt::Debug for VaultKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeys")
            .field("vault_id", &self.vault_id().ok())
            .finish()
    }
}

/// Encodes a verifying key as a vault id (base64url, no padding, SPKI DER).
pub fn encode_vault_id(key: &VerifyingKey) -> Result<VaultId> {
    let der = key
        .to_public_key_der()
        .map_err(|e| Error::Crypto(format!("Public key encoding failed: {}", e)))?;
    VaultId::new(URL_SAFE_NO_PAD.encode(der.as_bytes())).map_err(Error::Crypto)
}

/// Rebuilds the verifying key named by a vault id.
///
/// Any decode failure maps to `InvalidSignature`: an id that does not name
/// a usable key can never verify anything.
pub fn decode_vault_id(id: &VaultId) -> Result<VerifyingKey> {
    let der = URL_SAFE_NO_PAD
        .decode(id.as_str())
        .map_err(|_| Error::InvalidSignature)?;
    VerifyingKey::from_public_key_der(&der).map_err(|_| Error::InvalidSignature)
}

/// Verifies `signature` over `message` against the key named by `id`.
pub fn verify_with_id(id: &VaultId, message: &[u8], signature: &Signature) -> Result<()> {
    decode_vault_id(id)?
        .verify(message, signature)
        .map_err(|_| Error::InvalidSignature)
}
