//! Key derivation helpers using HKDF-SHA256.
//!
//! From the single session (master) key we derive:
//! - A unique **per-namespace** encryption key for each secret record.
//! - A **canary** key used to verify the passphrase on open.
//! - A dedicated **HMAC key** for header integrity checks.
//!
//! HKDF (RFC 5869) uses the master key as input keying material (IKM)
//! and a context string (`info`) to produce independent sub-keys.

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::errors::{Result, VaultError};

/// Length of derived sub-keys (256 bits).
const KEY_LEN: usize = 32;

/// Derive a per-namespace encryption key from the master key.
///
/// `info` is `"meraki-clu-secret:<namespace>"`, binding the derived key
/// to one namespace.
pub fn derive_namespace_key(master_key: &[u8], namespace: &str) -> Result<[u8; KEY_LEN]> {
    let info = format!("meraki-clu-secret:{namespace}");
    hkdf_derive(master_key, info.as_bytes())
}

/// Derive the key that seals the passphrase canary.
pub fn derive_canary_key(master_key: &[u8]) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(master_key, b"meraki-clu-canary-key")
}

/// Derive the key for the header HMAC.
pub fn derive_hmac_key(master_key: &[u8]) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(master_key, b"meraki-clu-hmac-key")
}

/// Run HKDF-SHA256 expand with the given `info`.
///
/// The master key already has high entropy (it came from Argon2id), so
/// no extract salt is used.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| VaultError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// The session key: a 32-byte master key that zeroes its memory on drop.
///
/// Deliberately not `Clone` or `Debug`.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Create a new `MasterKey` from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Derive a per-namespace encryption key from this master key.
    ///
    /// Sub-keys are wiped when the returned guard drops.
    pub fn derive_namespace_key(&self, namespace: &str) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        derive_namespace_key(&self.bytes, namespace).map(Zeroizing::new)
    }

    /// Derive the canary key from this master key.
    pub fn derive_canary_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        derive_canary_key(&self.bytes).map(Zeroizing::new)
    }

    /// Derive the header HMAC key from this master key.
    pub fn derive_hmac_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        derive_hmac_key(&self.bytes).map(Zeroizing::new)
    }
}
