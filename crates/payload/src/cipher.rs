//! AES-192-CBC payload encryption
//!
//! Ciphertexts carry their IV as a 16-byte prefix. PKCS7 padding failures
//! surface as `BadKey`: a wrong password produces garbage padding with
//! overwhelming probability, and that is the only signal CBC gives us.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use munkey_core::{Error, Result};
use rand::RngCore;

use crate::kdf::VaultKey;

type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;

/// IV size in bytes (one AES block)
pub const IV_SIZE: usize = 16;

const BLOCK_SIZE: usize = 16;

/// Encrypts `plaintext` under a fresh random IV.
///
/// Returns `iv || ciphertext`.
pub fn encrypt(key: &VaultKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut iv = [0u8; IV_SIZE];
    rand::rngs::OsRng.fill_bytes(&mut iv);

    let cipher = Aes192CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| Error::Crypto(format!("Cipher init failed: {}", e)))?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut out = Vec::with_capacity(IV_SIZE + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts `iv || ciphertext` produced by [`encrypt`].
///
/// # Errors
/// `BadKey` on short input, a ciphertext that is not a whole number of
/// blocks, or a padding failure.
pub fn decrypt(key: &VaultKey, bytes: &[u8]) -> Result<Vec<u8>> {
    if bytes.len() < IV_SIZE + BLOCK_SIZE {
        return Err(Error::BadKey);
    }
    let (iv, ciphertext) = bytes.split_at(IV_SIZE);
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(Error::BadKey);
    }

    let cipher = Aes192CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| Error::Crypto(format!("Cipher init failed: {}", e)))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| Error::BadKey)
}
