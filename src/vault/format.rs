//! Binary credential store format and header integrity verification.
//!
//! A store file has this layout:
//!
//! ```text
//! [MCLU: 4 bytes][version: 1 byte][header_len: 4 bytes LE][header JSON][records JSON][SHA-256: 32 bytes][HMAC-SHA256: 32 bytes]
//! ```
//!
//! - **Magic** (`MCLU`): identifies the file as a credential store.
//! - **Version**: envelope format version (currently `1`).
//! - **Header length**: little-endian u32 telling us where the header
//!   JSON ends and the records JSON begins.
//! - **Header JSON**: serialized `StoreHeader` (schema marker, KDF
//!   parameters, passphrase canary, namespace registry with a digest of
//!   every stored record).
//! - **Records JSON**: serialized `Vec<SecretRecord>`.
//! - **SHA-256**: unkeyed checksum of the header bytes, checked before
//!   any key is derived so a damaged header is never mistaken for a
//!   wrong passphrase.
//! - **HMAC-SHA256**: keyed tag over the header bytes.  Records are
//!   bound to the header through the registry digests, and each one is
//!   sealed by its own AEAD tag, so a damaged record fails on its own
//!   without taking the others down.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use argon2::Version;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

use super::record::{NamespaceEntry, SecretRecord};
use crate::crypto::kdf::Argon2Params;
use crate::errors::{Result, VaultError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every store file.
const MAGIC: &[u8; 4] = b"MCLU";

/// Current binary envelope version.
pub const FORMAT_VERSION: u8 = 1;

/// Schema without a namespace registry.
pub const SCHEMA_V1: u32 = 1;

/// Current header schema.
pub const CURRENT_SCHEMA: u32 = 2;

/// Identifier of the only supported key-derivation algorithm.
pub const KDF_ARGON2ID: &str = "argon2id";

/// Size of the HMAC tag appended to the file (SHA-256 = 32 bytes).
const HMAC_LEN: usize = 32;

/// Size of the unkeyed header checksum in front of the HMAC tag.
const CHECKSUM_LEN: usize = 32;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
pub const PREFIX_LEN: usize = 9;

/// Fixed-size trailer: header checksum + HMAC tag.
pub const TRAILER_LEN: usize = CHECKSUM_LEN + HMAC_LEN;

// ---------------------------------------------------------------------------
// StoreHeader
// ---------------------------------------------------------------------------

/// Key-derivation parameters stored in the header so open derives the
/// exact same key that create did.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KdfParams {
    /// Algorithm identifier, currently always `argon2id`.
    pub algorithm: String,

    /// Argon2 version number (`19` = 0x13).
    pub version: u32,

    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl KdfParams {
    /// Argon2id parameters for a fresh store.
    pub fn argon2id(salt: &[u8], params: &Argon2Params) -> Self {
        Self {
            algorithm: KDF_ARGON2ID.to_string(),
            version: 0x13,
            salt: salt.to_vec(),
            memory_kib: params.memory_kib,
            iterations: params.iterations,
            parallelism: params.parallelism,
        }
    }

    pub fn argon2_params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }

    /// Structural checks, run before any derivation is attempted.
    pub fn validate(&self) -> Result<Version> {
        if self.algorithm != KDF_ARGON2ID {
            return Err(VaultError::StoreCorrupt(format!(
                "unsupported key-derivation algorithm '{}'",
                self.algorithm
            )));
        }
        if self.salt.len() < 16 {
            return Err(VaultError::StoreCorrupt(format!(
                "key-derivation salt is too short ({} bytes)",
                self.salt.len()
            )));
        }
        self.argon2_params()
            .validate()
            .map_err(|e| VaultError::StoreCorrupt(format!("stored KDF parameters rejected: {e}")))?;
        match self.version {
            0x13 => Ok(Version::V0x13),
            0x10 => Ok(Version::V0x10),
            other => Err(VaultError::StoreCorrupt(format!(
                "unsupported Argon2 version {other}"
            ))),
        }
    }
}

/// Metadata stored at the beginning of a store file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHeader {
    /// Schema marker, see `CURRENT_SCHEMA`.
    pub schema: u32,

    /// When this store was first created.
    pub created_at: DateTime<Utc>,

    pub kdf: KdfParams,

    /// A fixed plaintext sealed under the canary key.
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub canary: Vec<u8>,

    /// Declared namespaces.  Missing in schema 1 stores.
    #[serde(default)]
    pub namespaces: BTreeMap<String, NamespaceEntry>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Write a store file to disk **atomically**.
///
/// 1. Serialize header and records to JSON.
/// 2. Compute the checksum and the HMAC over the header bytes.
/// 3. Write to a temp file in the same directory and fsync it.
/// 4. Rename the temp file over the target path and fsync the directory.
///
/// A crash at any point leaves either the old file or the new one.
pub fn write_store(
    path: &Path,
    header: &StoreHeader,
    records: &[SecretRecord],
    hmac_key: &[u8],
) -> Result<()> {
    let header_bytes = serde_json::to_vec(header)
        .map_err(|e| VaultError::EncryptionFailed(format!("header serialization: {e}")))?;
    let records_bytes = serde_json::to_vec(records)
        .map_err(|e| VaultError::EncryptionFailed(format!("records serialization: {e}")))?;

    let hmac_tag = compute_header_hmac(hmac_key, &header_bytes)?;

    let header_len = u32::try_from(header_bytes.len()).map_err(|_| {
        VaultError::EncryptionFailed(format!(
            "header length {} exceeds u32::MAX",
            header_bytes.len()
        ))
    })?;
    let total = PREFIX_LEN + header_bytes.len() + records_bytes.len() + TRAILER_LEN;
    let mut buf = Vec::with_capacity(total);

    buf.extend_from_slice(MAGIC);
    buf.push(FORMAT_VERSION);
    buf.extend_from_slice(&header_len.to_le_bytes());
    buf.extend_from_slice(&header_bytes);
    buf.extend_from_slice(&records_bytes);
    buf.extend_from_slice(&header_checksum(&header_bytes));
    buf.extend_from_slice(&hmac_tag);

    write_atomically(path, &buf)
}

/// Replace `path` with `data` via temp file + fsync + rename.
fn write_atomically(path: &Path, data: &[u8]) -> Result<()> {
    let unavailable = |what: &str, e: std::io::Error| {
        VaultError::StorageUnavailable(format!("{what} {}: {e}", path.display()))
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.exists() {
        fs::create_dir_all(parent).map_err(|e| unavailable("cannot create directory for", e))?;
    }

    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp_path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp_path);
        return Err(unavailable("cannot write", e));
    }

    // Persist the rename itself.  The new contents are already in place,
    // so a failure here is reported but does not fail the write.
    #[cfg(unix)]
    if let Err(e) = sync_dir(parent) {
        warn!(dir = %parent.display(), error = %e, "could not fsync store directory");
    }

    Ok(())
}

/// Flush a directory entry table to disk.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

/// Raw data read from a store file on disk.
///
/// Keeps the original header bytes so the HMAC can be verified over the
/// exact bytes that were written.
pub struct RawStore {
    pub header: StoreHeader,
    pub records: Vec<SecretRecord>,
    /// The raw header JSON bytes exactly as stored on disk.
    pub header_bytes: Vec<u8>,
    /// The HMAC tag stored at the end of the file.
    pub stored_hmac: Vec<u8>,
}

/// Read a store file and validate its structure.
///
/// Nothing here needs the passphrase: every failure is either
/// `VaultNotFound`, `StorageUnavailable` or `StoreCorrupt`.
pub fn read_store(path: &Path) -> Result<RawStore> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(VaultError::VaultNotFound(path.to_path_buf()));
        }
        Err(e) => {
            return Err(VaultError::StorageUnavailable(format!(
                "cannot read {}: {e}",
                path.display()
            )));
        }
    };

    parse_store(&data)
}

/// Parse the bytes of a store file.
pub fn parse_store(data: &[u8]) -> Result<RawStore> {
    let min_size = PREFIX_LEN + TRAILER_LEN;
    if data.len() < min_size {
        return Err(VaultError::StoreCorrupt(
            "file too small to be a credential store".into(),
        ));
    }

    if &data[0..4] != MAGIC {
        return Err(VaultError::StoreCorrupt("missing MCLU magic bytes".into()));
    }

    let version = data[4];
    if version != FORMAT_VERSION {
        return Err(VaultError::StoreCorrupt(format!(
            "unsupported format version {version}, expected {FORMAT_VERSION}"
        )));
    }

    let header_len_u32 = u32::from_le_bytes([data[5], data[6], data[7], data[8]]);
    let header_len = usize::try_from(header_len_u32).map_err(|_| {
        VaultError::StoreCorrupt(format!(
            "header length {header_len_u32} exceeds platform address space"
        ))
    })?;

    let header_end = PREFIX_LEN
        .checked_add(header_len)
        .filter(|end| end.checked_add(TRAILER_LEN).is_some_and(|t| t <= data.len()))
        .ok_or_else(|| VaultError::StoreCorrupt("header length exceeds file size".into()))?;

    let header_bytes = data[PREFIX_LEN..header_end].to_vec();
    let records_end = data.len() - TRAILER_LEN;
    let records_bytes = &data[header_end..records_end];
    let stored_checksum = &data[records_end..records_end + CHECKSUM_LEN];
    let stored_hmac = data[records_end + CHECKSUM_LEN..].to_vec();

    if !bool::from(header_checksum(&header_bytes)[..].ct_eq(stored_checksum)) {
        return Err(VaultError::StoreCorrupt(
            "header checksum mismatch, the file is damaged".into(),
        ));
    }

    let header: StoreHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| VaultError::StoreCorrupt(format!("header JSON: {e}")))?;

    if header.schema == 0 || header.schema > CURRENT_SCHEMA {
        return Err(VaultError::StoreCorrupt(format!(
            "unsupported schema {}, this build understands up to {CURRENT_SCHEMA}",
            header.schema
        )));
    }

    let records: Vec<SecretRecord> = serde_json::from_slice(records_bytes)
        .map_err(|e| VaultError::StoreCorrupt(format!("records JSON: {e}")))?;

    Ok(RawStore {
        header,
        records,
        header_bytes,
        stored_hmac,
    })
}

/// Unkeyed SHA-256 of the header bytes.
fn header_checksum(header_bytes: &[u8]) -> [u8; CHECKSUM_LEN] {
    Sha256::digest(header_bytes).into()
}

/// Compute HMAC-SHA256 over the header bytes.
pub fn compute_header_hmac(hmac_key: &[u8], header_bytes: &[u8]) -> Result<Vec<u8>> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|e| VaultError::KeyDerivationFailed(format!("invalid HMAC key: {e}")))?;

    mac.update(header_bytes);

    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify the header HMAC using constant-time comparison.
pub fn verify_header_hmac(hmac_key: &[u8], header_bytes: &[u8], expected: &[u8]) -> Result<()> {
    let mut mac = Hmac::<Sha256>::new_from_slice(hmac_key)
        .map_err(|e| VaultError::KeyDerivationFailed(format!("invalid HMAC key: {e}")))?;

    mac.update(header_bytes);

    mac.verify_slice(expected).map_err(|_| {
        VaultError::StoreCorrupt("header integrity check failed, the file was modified".into())
    })
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let encoded = BASE64.encode(data);
    serializer.serialize_str(&encoded)
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}
