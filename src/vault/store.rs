//! High-level vault operations.
//!
//! `Vault` wraps the binary format layer and the crypto layer so that the
//! session can work with simple calls like
//! `vault.set_secret("primary-api-credential", "...")`.  Every mutating
//! call persists before it returns; there is no separate save step.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::encryption::{decrypt, encrypt};
use crate::crypto::kdf::{derive_master_key_versioned, generate_salt, Argon2Params};
use crate::crypto::keys::MasterKey;
use crate::errors::{Result, VaultError};

use super::format::{self, KdfParams, StoreHeader, CURRENT_SCHEMA, SCHEMA_V1};
use super::record::{NamespaceEntry, NamespaceInfo, RecordSeal, SecretRecord};

/// Fixed plaintext sealed under the canary key at creation.
const CANARY_PLAINTEXT: &[u8] = b"meraki-clu credential store";

/// Associated data for the canary, disjoint from any valid namespace.
const CANARY_AAD: &[u8] = b"#canary";

/// Longest accepted namespace.
const MAX_NAMESPACE_LEN: usize = 64;

/// An unlocked credential store.  Create one with `Vault::create` or
/// `Vault::open`; dropping it zeroizes the session key.
pub struct Vault {
    /// Path to the store file on disk.
    path: PathBuf,

    header: StoreHeader,

    /// Namespace -> encrypted record.
    records: BTreeMap<String, SecretRecord>,

    /// The session key derived from the passphrase.
    master_key: MasterKey,
}

impl Vault {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a brand-new, empty store at `path`.
    ///
    /// Generates a random salt, derives the session key, seals the canary
    /// and writes the store durably before returning.  Pass `None` for
    /// `argon2_params` to use the defaults.
    pub fn create(
        path: &Path,
        passphrase: &[u8],
        argon2_params: Option<&Argon2Params>,
    ) -> Result<Self> {
        if passphrase.is_empty() {
            return Err(VaultError::InvalidPassphrase(
                "passphrase cannot be empty".into(),
            ));
        }
        if path.exists() {
            return Err(VaultError::VaultAlreadyExists(path.to_path_buf()));
        }

        let params = argon2_params.copied().unwrap_or_default();
        params.validate()?;
        let salt = generate_salt();
        let kdf = KdfParams::argon2id(&salt, &params);
        let master_key = derive_session_key(passphrase, &kdf)?;

        let header = StoreHeader {
            schema: CURRENT_SCHEMA,
            created_at: Utc::now(),
            canary: seal_canary(&master_key)?,
            kdf,
            namespaces: BTreeMap::new(),
        };

        let vault = Self {
            path: path.to_path_buf(),
            header,
            records: BTreeMap::new(),
            master_key,
        };
        vault.persist(&vault.header, &vault.records)?;

        info!(path = %path.display(), "created credential store");
        Ok(vault)
    }

    /// Open an existing store and verify the passphrase.
    ///
    /// Structural problems, including a header that fails its checksum,
    /// surface as `StoreCorrupt` before any key is derived.  The key is
    /// then derived with the **stored** parameters and checked against the
    /// canary (`WrongPassphrase` on mismatch), and only then is the header
    /// HMAC verified (`StoreCorrupt` on mismatch).  Records are checked
    /// against the registry when they are read.
    pub fn open(path: &Path, passphrase: &[u8]) -> Result<Self> {
        let raw = format::read_store(path)?;

        let master_key = derive_session_key(passphrase, &raw.header.kdf)?;

        verify_canary(&master_key, &raw.header.canary)?;

        let hmac_key = master_key.derive_hmac_key()?;
        format::verify_header_hmac(&hmac_key[..], &raw.header_bytes, &raw.stored_hmac)?;

        let mut header = raw.header;
        let mut records = BTreeMap::new();
        for record in raw.records {
            Self::validate_namespace(&record.namespace).map_err(|_| {
                VaultError::StoreCorrupt(format!(
                    "record has an invalid namespace '{}'",
                    record.namespace
                ))
            })?;
            if records.contains_key(&record.namespace) {
                return Err(VaultError::StoreCorrupt(format!(
                    "duplicate record for namespace '{}'",
                    record.namespace
                )));
            }
            records.insert(record.namespace.clone(), record);
        }

        if header.schema == SCHEMA_V1 {
            // Schema 1 has no registry; the records on disk are all there is.
            debug!("migrating schema 1 store in memory");
            header.schema = CURRENT_SCHEMA;
            for record in records.values() {
                let entry = header
                    .namespaces
                    .entry(record.namespace.clone())
                    .or_insert_with(|| NamespaceEntry::declared(record.created_at));
                entry.sealed = Some(RecordSeal::of(record));
            }
        }

        debug!(path = %path.display(), records = records.len(), "opened credential store");
        Ok(Self {
            path: path.to_path_buf(),
            header,
            records,
            master_key,
        })
    }

    // ------------------------------------------------------------------
    // Secret operations
    // ------------------------------------------------------------------

    /// Decrypt and return the secret stored for `namespace`.
    ///
    /// `Ok(None)` means nothing has been stored yet.  A record that is
    /// missing, replaced or fails authentication is `DecryptionFailed`,
    /// never `None`.
    pub fn get_secret(&self, namespace: &str) -> Result<Option<String>> {
        Self::validate_namespace(namespace)?;
        let Some(record) = self.checked_record(namespace)? else {
            return Ok(None);
        };

        let key = self.master_key.derive_namespace_key(namespace)?;
        let Some(plaintext) = decrypt(&key[..], &record.ciphertext, namespace.as_bytes()) else {
            warn!(namespace, "stored secret failed authentication");
            return Err(VaultError::DecryptionFailed(namespace.to_string()));
        };

        String::from_utf8(plaintext).map(Some).map_err(|e| {
            let mut bad_bytes = e.into_bytes();
            bad_bytes.zeroize();
            VaultError::DecryptionFailed(namespace.to_string())
        })
    }

    /// The record for `namespace`, checked against the header registry.
    fn checked_record(&self, namespace: &str) -> Result<Option<&SecretRecord>> {
        let sealed = self
            .header
            .namespaces
            .get(namespace)
            .and_then(|entry| entry.sealed.as_ref());

        match (sealed, self.records.get(namespace)) {
            (None, None) => Ok(None),
            (Some(seal), Some(record)) if seal.matches(record) => Ok(Some(record)),
            (Some(_), None) => {
                warn!(namespace, "stored secret is missing from the file");
                Err(VaultError::DecryptionFailed(namespace.to_string()))
            }
            (_, Some(_)) => {
                warn!(namespace, "stored secret does not match the header");
                Err(VaultError::DecryptionFailed(namespace.to_string()))
            }
        }
    }

    /// Create or replace the secret for `namespace` and persist it.
    ///
    /// Declares the namespace if needed.  If the write fails the vault is
    /// left exactly as it was, in memory and on disk.
    pub fn set_secret(&mut self, namespace: &str, value: &str) -> Result<()> {
        Self::validate_namespace(namespace)?;

        let key = self.master_key.derive_namespace_key(namespace)?;
        let ciphertext = encrypt(&key[..], value.as_bytes(), namespace.as_bytes())?;

        let now = Utc::now();
        let created_at = self
            .records
            .get(namespace)
            .map_or(now, |existing| existing.created_at);
        let record = SecretRecord {
            namespace: namespace.to_string(),
            ciphertext,
            created_at,
            updated_at: now,
        };

        let mut header = self.header.clone();
        header
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| NamespaceEntry::declared(now))
            .sealed = Some(RecordSeal::of(&record));

        let mut records = self.records.clone();
        records.insert(namespace.to_string(), record);

        self.commit(header, records)?;
        debug!(namespace, "stored secret");
        Ok(())
    }

    /// Declare `namespace` if this store does not know it yet.
    ///
    /// Idempotent: a second call neither writes nor changes anything, and
    /// existing records are never touched.
    pub fn ensure_namespace(&mut self, namespace: &str) -> Result<()> {
        Self::validate_namespace(namespace)?;
        if self.header.namespaces.contains_key(namespace) {
            return Ok(());
        }

        let mut header = self.header.clone();
        header
            .namespaces
            .insert(namespace.to_string(), NamespaceEntry::declared(Utc::now()));
        let records = self.records.clone();
        self.commit(header, records)?;

        info!(namespace, "declared namespace");
        Ok(())
    }

    /// Remove the secret stored for `namespace`, keeping the namespace
    /// declared.  Returns `false` if there was nothing to remove.
    ///
    /// Works on damaged records too, so a credential that can no longer
    /// be trusted can be cleared and set again.
    pub fn remove_secret(&mut self, namespace: &str) -> Result<bool> {
        Self::validate_namespace(namespace)?;
        let sealed = self
            .header
            .namespaces
            .get(namespace)
            .is_some_and(|entry| entry.sealed.is_some());
        if !sealed && !self.records.contains_key(namespace) {
            return Ok(false);
        }

        let mut header = self.header.clone();
        if let Some(entry) = header.namespaces.get_mut(namespace) {
            entry.sealed = None;
        }
        let mut records = self.records.clone();
        records.remove(namespace);
        self.commit(header, records)?;

        debug!(namespace, "removed secret");
        Ok(true)
    }

    /// Re-key the whole store under a new passphrase.
    ///
    /// Every record is decrypted first; if any of them cannot be trusted
    /// the operation is refused and nothing changes.  A fresh salt and
    /// canary are generated and all records are re-sealed.
    pub fn change_passphrase(
        &mut self,
        new_passphrase: &[u8],
        argon2_params: Option<&Argon2Params>,
    ) -> Result<()> {
        if new_passphrase.is_empty() {
            return Err(VaultError::InvalidPassphrase(
                "passphrase cannot be empty".into(),
            ));
        }

        let namespaces: BTreeSet<&String> = self
            .header
            .namespaces
            .keys()
            .chain(self.records.keys())
            .collect();
        let mut plaintexts: Vec<(String, Zeroizing<String>)> = Vec::new();
        for namespace in namespaces {
            if let Some(value) = self.get_secret(namespace)? {
                plaintexts.push((namespace.clone(), Zeroizing::new(value)));
            }
        }

        let params = argon2_params
            .copied()
            .unwrap_or_else(|| self.header.kdf.argon2_params());
        params.validate()?;
        let kdf = KdfParams::argon2id(&generate_salt(), &params);
        let new_key = derive_session_key(new_passphrase, &kdf)?;

        let mut header = self.header.clone();
        header.schema = CURRENT_SCHEMA;
        header.canary = seal_canary(&new_key)?;
        header.kdf = kdf;

        let mut records = BTreeMap::new();
        for (namespace, value) in &plaintexts {
            let existing = &self.records[namespace];
            let key = new_key.derive_namespace_key(namespace)?;
            let record = SecretRecord {
                namespace: namespace.clone(),
                ciphertext: encrypt(&key[..], value.as_bytes(), namespace.as_bytes())?,
                created_at: existing.created_at,
                updated_at: existing.updated_at,
            };
            header
                .namespaces
                .entry(namespace.clone())
                .or_insert_with(|| NamespaceEntry::declared(existing.created_at))
                .sealed = Some(RecordSeal::of(&record));
            records.insert(namespace.clone(), record);
        }

        let hmac_key = new_key.derive_hmac_key()?;
        format::write_store(
            &self.path,
            &header,
            &records.values().cloned().collect::<Vec<_>>(),
            &hmac_key[..],
        )?;

        self.header = header;
        self.records = records;
        self.master_key = new_key;

        info!(records = self.records.len(), "changed store passphrase");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Write `header` + `records` and adopt them only once they are durable.
    fn commit(
        &mut self,
        header: StoreHeader,
        records: BTreeMap<String, SecretRecord>,
    ) -> Result<()> {
        self.persist(&header, &records)?;
        self.header = header;
        self.records = records;
        Ok(())
    }

    fn persist(&self, header: &StoreHeader, records: &BTreeMap<String, SecretRecord>) -> Result<()> {
        // BTreeMap iteration keeps the output sorted and deterministic.
        let list: Vec<SecretRecord> = records.values().cloned().collect();

        let hmac_key = self.master_key.derive_hmac_key()?;
        format::write_store(&self.path, header, &list, &hmac_key[..])
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Returns the path to the store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the store creation timestamp.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.header.created_at
    }

    /// Returns the schema the store is at in memory.
    pub fn schema(&self) -> u32 {
        self.header.schema
    }

    /// Returns the stored key-derivation parameters.
    pub fn kdf_params(&self) -> &KdfParams {
        &self.header.kdf
    }

    /// Returns `true` if `namespace` is declared in this store.
    pub fn is_declared(&self, namespace: &str) -> bool {
        self.header.namespaces.contains_key(namespace)
    }

    /// Returns `true` if the registry says a secret is stored for
    /// `namespace`.
    ///
    /// Metadata-only check; no decryption is performed.
    pub fn contains_secret(&self, namespace: &str) -> bool {
        self.header
            .namespaces
            .get(namespace)
            .is_some_and(|entry| entry.sealed.is_some())
    }

    /// Declared namespaces with their timestamps, sorted by name.
    pub fn namespaces(&self) -> Vec<NamespaceInfo> {
        self.header
            .namespaces
            .iter()
            .map(|(name, entry)| NamespaceInfo {
                name: name.clone(),
                declared_at: entry.created_at,
                updated_at: entry.sealed.as_ref().map(|seal| seal.updated_at),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Validation
    // ------------------------------------------------------------------

    /// Allowed: ASCII lowercase letters, digits, hyphens, underscores,
    /// periods.  Must be non-empty and at most 64 characters.
    fn validate_namespace(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(VaultError::InvalidNamespace(
                "namespace cannot be empty".into(),
            ));
        }
        if name.len() > MAX_NAMESPACE_LEN {
            return Err(VaultError::InvalidNamespace(format!(
                "namespace cannot exceed {MAX_NAMESPACE_LEN} characters"
            )));
        }
        if !name.bytes().all(|b| {
            b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_' || b == b'.'
        }) {
            return Err(VaultError::InvalidNamespace(format!(
                "'{name}' contains invalid characters, only lowercase letters, digits, '-', '_' and '.' are allowed"
            )));
        }
        Ok(())
    }
}

/// Derive the session key with the parameters recorded in `kdf`.
fn derive_session_key(passphrase: &[u8], kdf: &KdfParams) -> Result<MasterKey> {
    let version = kdf.validate()?;
    let bytes = Zeroizing::new(derive_master_key_versioned(
        passphrase,
        &kdf.salt,
        &kdf.argon2_params(),
        version,
    )?);
    Ok(MasterKey::new(*bytes))
}

fn seal_canary(master_key: &MasterKey) -> Result<Vec<u8>> {
    let key = master_key.derive_canary_key()?;
    encrypt(&key[..], CANARY_PLAINTEXT, CANARY_AAD)
}

fn verify_canary(master_key: &MasterKey, canary: &[u8]) -> Result<()> {
    let key = master_key.derive_canary_key()?;
    let opened = decrypt(&key[..], canary, CANARY_AAD);

    match opened {
        Some(plain) if bool::from(plain.as_slice().ct_eq(CANARY_PLAINTEXT)) => Ok(()),
        _ => {
            debug!("canary did not verify");
            Err(VaultError::WrongPassphrase)
        }
    }
}
