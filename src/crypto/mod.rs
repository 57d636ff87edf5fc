//! Cryptographic primitives for the credential vault.
//!
//! This module provides:
//! - AES-256-GCM encryption and decryption with associated data (`encryption`)
//! - Argon2id passphrase-based key derivation (`kdf`)
//! - HKDF-based per-namespace, canary and HMAC key derivation (`keys`)

pub mod encryption;
pub mod kdf;
pub mod keys;

pub use encryption::{decrypt, encrypt};
pub use kdf::{derive_master_key, generate_salt, Argon2Params};
pub use keys::{derive_canary_key, derive_hmac_key, derive_namespace_key, MasterKey};
