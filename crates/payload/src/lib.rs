//! # Munkey Payload Codec
//!
//! The signed envelope and encrypted payload format shared by every vault.
//!
//! ## Format
//!
//! The unit persisted in a vault's single attachment is a little-endian,
//! length-prefixed *envelope*:
//!
//! ```text
//! u32 protocol_version (= 0)
//! u32 signature_algo   (= 0, Ed25519 / SHA-512)
//! u32 signature_length
//! u32 payload_length
//! bytes signature
//! bytes payload        (encrypted wrapped body)
//! ```
//!
//! The payload decrypts (AES-192-CBC, key from PBKDF2-HMAC-SHA-256) to the
//! vault's own private key joined with the JSON entry map. The verifying
//! public key doubles as the vault identifier (base64url of its SPKI DER).
//!
//! ## Security
//!
//! - 100% Rust implementation (no C/C++)
//! - Derived keys are zeroized on drop
//! - Every length field is validated against the remaining buffer before use

pub mod cipher;
pub mod envelope;
pub mod kdf;
pub mod keys;

pub use cipher::{decrypt, encrypt, IV_SIZE};
pub use envelope::{
    join_body, open_payload, seal_payload, sign, split_body, unwrap, verify, wrap,
    WrappedPayload, CIPHER_AES192_CBC, PAYLOAD_TYPE_JSON, PROTOCOL_VERSION, SIG_ALGO_SHA512,
};
pub use kdf::{derive_key, VaultKey, DERIVED_KEY_SIZE, PBKDF2_ITERATIONS};
pub use keys::{decode_vault_id, encode_vault_id, VaultKeys};
