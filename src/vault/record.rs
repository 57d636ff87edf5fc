//! Record types stored inside a credential store.
//!
//! Each record holds its namespace, the sealed value (as raw bytes) and
//! creation/update timestamps.  The header registry keeps a `RecordSeal`
//! per stored record, so a record that goes missing or is swapped for an
//! older copy no longer matches what the authenticated header expects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::format::{base64_decode, base64_encode};

/// A single encrypted secret stored in the vault.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Which logical secret this is (e.g. "primary-api-credential").
    pub namespace: String,

    /// Nonce + ciphertext + tag, sealed with the namespace as associated data.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext: Vec<u8>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registry entry for a declared namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceEntry {
    pub created_at: DateTime<Utc>,

    /// Digest of the record that must be present, `None` when no secret
    /// is stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sealed: Option<RecordSeal>,
}

impl NamespaceEntry {
    pub fn declared(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            sealed: None,
        }
    }
}

/// Commitment to one stored record, kept in the authenticated header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSeal {
    /// SHA-256 of the record's ciphertext.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext_sha256: Vec<u8>,

    pub updated_at: DateTime<Utc>,
}

impl RecordSeal {
    pub fn of(record: &SecretRecord) -> Self {
        Self {
            ciphertext_sha256: Sha256::digest(&record.ciphertext).to_vec(),
            updated_at: record.updated_at,
        }
    }

    /// Whether `record` is exactly the one this seal was made for.
    pub fn matches(&self, record: &SecretRecord) -> bool {
        let digest = Sha256::digest(&record.ciphertext);
        bool::from(digest.as_slice().ct_eq(&self.ciphertext_sha256))
    }
}

/// What the vault knows about a namespace without decrypting anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub declared_at: DateTime<Utc>,
    /// `None` when the namespace is declared but holds no secret yet.
    pub updated_at: Option<DateTime<Utc>>,
}
