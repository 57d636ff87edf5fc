//! Integration tests for the credential vault.

use std::fs;
use std::path::{Path, PathBuf};

use merakiclu::crypto::derive_master_key;
use merakiclu::crypto::kdf::Argon2Params;
use merakiclu::crypto::keys::derive_hmac_key;
use merakiclu::errors::VaultError;
use merakiclu::vault::format::{self, SCHEMA_V1};
use merakiclu::vault::{SecretRecord, StoreHeader, Vault, CURRENT_SCHEMA};
use tempfile::TempDir;

const PRIMARY: &str = "primary-api-credential";
const TOOL: &str = "secondary-tool-credential";

/// Cheapest parameters the KDF accepts, so tests stay fast.
fn fast() -> Argon2Params {
    Argon2Params {
        memory_kib: 8_192,
        iterations: 1,
        parallelism: 1,
    }
}

/// Helper: a store path inside a fresh temp dir.
fn vault_path() -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("create temp dir");
    let path = dir.path().join("credentials.vault");
    (dir, path)
}

/// Rewrite a store file on disk, re-signing the header with the key that
/// `passphrase` derives.
fn rewrite_signed(
    path: &Path,
    passphrase: &[u8],
    edit: impl FnOnce(&mut StoreHeader, &mut Vec<SecretRecord>),
) {
    let mut raw = format::read_store(path).unwrap();
    edit(&mut raw.header, &mut raw.records);
    let key = derive_master_key(
        passphrase,
        &raw.header.kdf.salt,
        &raw.header.kdf.argon2_params(),
    )
    .unwrap();
    let hmac_key = derive_hmac_key(&key).unwrap();
    format::write_store(path, &raw.header, &raw.records, &hmac_key).unwrap();
}

/// Replace the records section of a store file, leaving the signed header,
/// its checksum and its tag byte-for-byte as they were.
fn rewrite_records(path: &Path, edit: impl FnOnce(&mut Vec<SecretRecord>)) {
    let data = fs::read(path).unwrap();
    let mut raw = format::parse_store(&data).unwrap();
    edit(&mut raw.records);

    let header_end = format::PREFIX_LEN + raw.header_bytes.len();
    let mut out = data[..header_end].to_vec();
    out.extend_from_slice(&serde_json::to_vec(&raw.records).unwrap());
    out.extend_from_slice(&data[data.len() - format::TRAILER_LEN..]);
    fs::write(path, out).unwrap();
}

// ---------------------------------------------------------------------------
// Create / open round-trip
// ---------------------------------------------------------------------------

#[test]
fn stored_secret_survives_reopen() {
    let (_dir, path) = vault_path();

    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    drop(vault);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("abc123"));
}

#[test]
fn new_store_is_current_schema_and_empty() {
    let (_dir, path) = vault_path();

    let vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    assert_eq!(vault.schema(), CURRENT_SCHEMA);
    assert!(vault.namespaces().is_empty());
    assert_eq!(vault.kdf_params().memory_kib, 8_192);
    assert!(path.exists());
}

#[test]
fn create_over_existing_store_fails() {
    let (_dir, path) = vault_path();
    Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();

    let result = Vault::create(&path, b"other-passphrase", Some(&fast()));
    assert!(matches!(result, Err(VaultError::VaultAlreadyExists(_))));
}

#[test]
fn create_rejects_empty_passphrase() {
    let (_dir, path) = vault_path();
    let result = Vault::create(&path, b"", Some(&fast()));
    assert!(matches!(result, Err(VaultError::InvalidPassphrase(_))));
    assert!(!path.exists());
}

#[test]
fn create_in_missing_directory_creates_it() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("deeper").join("credentials.vault");

    Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    assert!(path.exists());
}

#[test]
fn create_where_parent_is_a_file_is_storage_unavailable() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    fs::write(&blocker, b"plain file").unwrap();

    let result = Vault::create(&blocker.join("credentials.vault"), b"pw", Some(&fast()));
    assert!(matches!(result, Err(VaultError::StorageUnavailable(_))));
}

#[cfg(unix)]
#[test]
fn store_file_is_owner_only() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, path) = vault_path();
    Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
}

// ---------------------------------------------------------------------------
// Wrong passphrase vs corruption
// ---------------------------------------------------------------------------

#[test]
fn wrong_passphrase_is_reported_as_such() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    drop(vault);

    let result = Vault::open(&path, b"wrong");
    assert!(matches!(result, Err(VaultError::WrongPassphrase)));

    // The failed attempt changed nothing.
    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("abc123"));
}

#[test]
fn missing_store_is_not_found() {
    let (_dir, path) = vault_path();
    let result = Vault::open(&path, b"correct-horse");
    assert!(matches!(result, Err(VaultError::VaultNotFound(_))));
}

#[test]
fn garbage_file_is_corrupt_not_wrong_passphrase() {
    let (_dir, path) = vault_path();
    fs::write(&path, b"this is not a credential store at all, just text").unwrap();

    let result = Vault::open(&path, b"correct-horse");
    assert!(matches!(result, Err(VaultError::StoreCorrupt(_))));
}

#[test]
fn truncated_file_is_corrupt() {
    let (_dir, path) = vault_path();
    Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();

    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() / 2]).unwrap();

    let result = Vault::open(&path, b"correct-horse");
    assert!(matches!(result, Err(VaultError::StoreCorrupt(_))));
}

#[test]
fn edited_header_is_corrupt_with_the_right_passphrase() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    drop(vault);

    // Rewrite with a different key so the canary still opens but the tag
    // no longer matches the header.
    let mut raw = format::read_store(&path).unwrap();
    raw.header.created_at -= chrono::Duration::days(365);
    format::write_store(&path, &raw.header, &raw.records, &[0x42; 32]).unwrap();

    let result = Vault::open(&path, b"correct-horse");
    assert!(matches!(result, Err(VaultError::StoreCorrupt(_))));
}

#[test]
fn unknown_future_schema_is_corrupt() {
    let (_dir, path) = vault_path();
    Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();

    rewrite_signed(&path, b"correct-horse", |header, _| {
        header.schema = CURRENT_SCHEMA + 1;
    });

    let result = Vault::open(&path, b"correct-horse");
    assert!(matches!(result, Err(VaultError::StoreCorrupt(_))));
}

#[test]
fn damaged_canary_is_corrupt_not_wrong_passphrase() {
    let (_dir, path) = vault_path();
    Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();

    // Change one base64 character of the canary in place.
    let mut data = fs::read(&path).unwrap();
    let marker = b"\"canary\":\"";
    let start = data
        .windows(marker.len())
        .position(|w| w == marker)
        .unwrap()
        + marker.len();
    data[start] = if data[start] == b'A' { b'B' } else { b'A' };
    fs::write(&path, &data).unwrap();

    let result = Vault::open(&path, b"correct-horse");
    assert!(matches!(result, Err(VaultError::StoreCorrupt(_))));
}

#[test]
fn damaged_salt_is_corrupt_not_wrong_passphrase() {
    let (_dir, path) = vault_path();
    Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();

    let mut data = fs::read(&path).unwrap();
    let marker = b"\"salt\":\"";
    let start = data
        .windows(marker.len())
        .position(|w| w == marker)
        .unwrap()
        + marker.len();
    data[start] = if data[start] == b'A' { b'B' } else { b'A' };
    fs::write(&path, &data).unwrap();

    let result = Vault::open(&path, b"correct-horse");
    assert!(matches!(result, Err(VaultError::StoreCorrupt(_))));
}

// ---------------------------------------------------------------------------
// Record-level integrity
// ---------------------------------------------------------------------------

#[test]
fn stripped_records_are_not_read_as_absent() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    vault.ensure_namespace(TOOL).unwrap();
    drop(vault);

    rewrite_records(&path, |records| records.clear());

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert!(vault.is_declared(PRIMARY));
    assert!(vault.contains_secret(PRIMARY));
    assert!(matches!(
        vault.get_secret(PRIMARY),
        Err(VaultError::DecryptionFailed(ns)) if ns == PRIMARY
    ));
    // A namespace that never held a secret is still simply absent.
    assert_eq!(vault.get_secret(TOOL).unwrap(), None);
}

#[test]
fn rolled_back_record_is_rejected() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "old-key").unwrap();
    let old = format::read_store(&path).unwrap().records;
    vault.set_secret(PRIMARY, "new-key").unwrap();
    drop(vault);

    // The older record is a perfectly valid ciphertext for this namespace.
    rewrite_records(&path, |records| *records = old);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert!(matches!(
        vault.get_secret(PRIMARY),
        Err(VaultError::DecryptionFailed(_))
    ));
}

#[test]
fn damaged_record_can_be_cleared_and_set_again() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    drop(vault);

    rewrite_records(&path, |records| records.clear());

    let mut vault = Vault::open(&path, b"correct-horse").unwrap();
    assert!(vault.remove_secret(PRIMARY).unwrap());
    assert_eq!(vault.get_secret(PRIMARY).unwrap(), None);
    vault.set_secret(PRIMARY, "fresh").unwrap();
    drop(vault);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("fresh"));
}

#[test]
fn corrupted_record_fails_alone() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    vault.set_secret(TOOL, "ipinfo-token").unwrap();
    drop(vault);

    rewrite_records(&path, |records| {
        let record = records.iter_mut().find(|r| r.namespace == PRIMARY).unwrap();
        let last = record.ciphertext.len() - 1;
        record.ciphertext[last] ^= 0x01;
    });

    // The passphrase is still right and the header is intact.
    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert!(matches!(
        vault.get_secret(PRIMARY),
        Err(VaultError::DecryptionFailed(ns)) if ns == PRIMARY
    ));
    assert_eq!(
        vault.get_secret(TOOL).unwrap().as_deref(),
        Some("ipinfo-token")
    );
}

#[test]
fn swapped_ciphertexts_do_not_decrypt() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    vault.set_secret(TOOL, "ipinfo-token").unwrap();
    drop(vault);

    rewrite_records(&path, |records| {
        let a = records[0].ciphertext.clone();
        let b = records[1].ciphertext.clone();
        records[0].ciphertext = b;
        records[1].ciphertext = a;
    });

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert!(matches!(
        vault.get_secret(PRIMARY),
        Err(VaultError::DecryptionFailed(_))
    ));
    assert!(matches!(
        vault.get_secret(TOOL),
        Err(VaultError::DecryptionFailed(_))
    ));
}

// ---------------------------------------------------------------------------
// Secret operations
// ---------------------------------------------------------------------------

#[test]
fn absent_secret_is_none() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.ensure_namespace(TOOL).unwrap();

    assert_eq!(vault.get_secret(TOOL).unwrap(), None);
    // Never declared at all reads the same.
    assert_eq!(vault.get_secret("never-declared").unwrap(), None);
}

#[test]
fn empty_string_is_a_stored_value() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(TOOL, "").unwrap();
    drop(vault);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.get_secret(TOOL).unwrap().as_deref(), Some(""));
    assert!(vault.contains_secret(TOOL));
}

#[test]
fn overwrite_keeps_created_at_and_replaces_value() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "first").unwrap();
    let declared = vault.namespaces()[0].declared_at;

    vault.set_secret(PRIMARY, "second").unwrap();
    drop(vault);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("second"));
    let info = &vault.namespaces()[0];
    assert_eq!(info.declared_at, declared);
    assert!(info.updated_at.unwrap() >= declared);
}

#[test]
fn unicode_and_long_values_round_trip() {
    let (_dir, path) = vault_path();
    let long = "k".repeat(10_000);
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "clé-🔑-ключ").unwrap();
    vault.set_secret(TOOL, &long).unwrap();
    drop(vault);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("clé-🔑-ключ"));
    assert_eq!(vault.get_secret(TOOL).unwrap(), Some(long));
}

#[test]
fn plaintext_never_reaches_disk() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "very-recognisable-api-key").unwrap();

    let data = fs::read(&path).unwrap();
    let needle = b"very-recognisable-api-key";
    assert!(!data.windows(needle.len()).any(|w| w == needle));
    let pass = b"correct-horse";
    assert!(!data.windows(pass.len()).any(|w| w == pass));
}

#[test]
fn ensure_namespace_is_idempotent() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();

    vault.ensure_namespace(PRIMARY).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    let before = fs::read(&path).unwrap();

    vault.ensure_namespace(PRIMARY).unwrap();
    assert_eq!(fs::read(&path).unwrap(), before, "second call must not write");
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("abc123"));
    assert_eq!(vault.namespaces().len(), 1);
}

#[test]
fn declared_namespaces_persist() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.ensure_namespace(PRIMARY).unwrap();
    vault.ensure_namespace(TOOL).unwrap();
    drop(vault);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert!(vault.is_declared(PRIMARY));
    assert!(vault.is_declared(TOOL));
    assert!(!vault.contains_secret(PRIMARY));
    let names: Vec<_> = vault.namespaces().into_iter().map(|n| n.name).collect();
    assert_eq!(names, vec![PRIMARY.to_string(), TOOL.to_string()]);
}

#[test]
fn invalid_namespaces_are_rejected() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();

    let too_long = "x".repeat(65);
    for bad in ["", "Upper", "has space", "slash/name", too_long.as_str()] {
        assert!(
            matches!(vault.set_secret(bad, "v"), Err(VaultError::InvalidNamespace(_))),
            "{bad:?} should be rejected"
        );
        assert!(matches!(
            vault.ensure_namespace(bad),
            Err(VaultError::InvalidNamespace(_))
        ));
    }
}

#[test]
fn remove_secret_keeps_namespace_declared() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(TOOL, "ipinfo-token").unwrap();

    assert!(vault.remove_secret(TOOL).unwrap());
    assert!(!vault.remove_secret(TOOL).unwrap());
    drop(vault);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.get_secret(TOOL).unwrap(), None);
    assert!(vault.is_declared(TOOL));
}

// ---------------------------------------------------------------------------
// Failed writes leave state untouched
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[test]
fn failed_write_rolls_back_in_memory_state() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    let store_dir = dir.path().join("store");
    fs::create_dir(&store_dir).unwrap();
    let path = store_dir.join("credentials.vault");

    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "original").unwrap();

    // A read-only directory blocks the temp file the write needs.
    fs::set_permissions(&store_dir, fs::Permissions::from_mode(0o500)).unwrap();
    let write_check = store_dir.join("write_check");
    let writable = fs::write(&write_check, b"x").is_ok();
    let _ = fs::remove_file(&write_check);

    if !writable {
        let result = vault.set_secret(PRIMARY, "replacement");
        assert!(matches!(result, Err(VaultError::StorageUnavailable(_))));
        assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("original"));

        let result = vault.ensure_namespace(TOOL);
        assert!(result.is_err());
        assert!(!vault.is_declared(TOOL));
    }

    fs::set_permissions(&store_dir, fs::Permissions::from_mode(0o700)).unwrap();
    let reopened = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(
        reopened.get_secret(PRIMARY).unwrap().as_deref(),
        Some("original")
    );
}

// ---------------------------------------------------------------------------
// Passphrase change
// ---------------------------------------------------------------------------

#[test]
fn change_passphrase_rekeys_everything() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    vault.ensure_namespace(TOOL).unwrap();
    let old_salt = vault.kdf_params().salt.clone();

    vault.change_passphrase(b"battery-staple", None).unwrap();
    assert_ne!(vault.kdf_params().salt, old_salt);
    // The in-memory session keeps working with the new key.
    vault.set_secret(TOOL, "ipinfo-token").unwrap();
    drop(vault);

    assert!(matches!(
        Vault::open(&path, b"correct-horse"),
        Err(VaultError::WrongPassphrase)
    ));
    let vault = Vault::open(&path, b"battery-staple").unwrap();
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("abc123"));
    assert_eq!(vault.get_secret(TOOL).unwrap().as_deref(), Some("ipinfo-token"));
    assert_eq!(vault.kdf_params().memory_kib, 8_192);
}

#[test]
fn change_passphrase_refuses_when_a_record_is_damaged() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    drop(vault);

    rewrite_records(&path, |records| records[0].ciphertext[0] ^= 0xFF);
    let before = fs::read(&path).unwrap();

    let mut vault = Vault::open(&path, b"correct-horse").unwrap();
    let result = vault.change_passphrase(b"battery-staple", None);
    assert!(matches!(result, Err(VaultError::DecryptionFailed(_))));
    assert_eq!(fs::read(&path).unwrap(), before);
}

// ---------------------------------------------------------------------------
// Schema migration
// ---------------------------------------------------------------------------

#[test]
fn schema_one_store_opens_and_upgrades_on_next_write() {
    let (_dir, path) = vault_path();
    let mut vault = Vault::create(&path, b"correct-horse", Some(&fast())).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    drop(vault);

    // Strip the registry and mark the file as the older layout.
    rewrite_signed(&path, b"correct-horse", |header, _| {
        header.schema = SCHEMA_V1;
        header.namespaces.clear();
    });
    assert_eq!(format::read_store(&path).unwrap().header.schema, SCHEMA_V1);

    let mut vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.schema(), CURRENT_SCHEMA);
    assert!(vault.is_declared(PRIMARY));
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("abc123"));

    vault.ensure_namespace(TOOL).unwrap();
    drop(vault);

    let raw = format::read_store(&path).unwrap();
    assert_eq!(raw.header.schema, CURRENT_SCHEMA);
    assert!(raw.header.namespaces.contains_key(PRIMARY));
    assert!(raw.header.namespaces.contains_key(TOOL));
}

#[test]
fn stored_kdf_parameters_are_used_on_open() {
    let (_dir, path) = vault_path();
    let custom = Argon2Params {
        memory_kib: 9_216,
        iterations: 2,
        parallelism: 1,
    };
    let mut vault = Vault::create(&path, b"correct-horse", Some(&custom)).unwrap();
    vault.set_secret(PRIMARY, "abc123").unwrap();
    drop(vault);

    let vault = Vault::open(&path, b"correct-horse").unwrap();
    assert_eq!(vault.kdf_params().argon2_params(), custom);
    assert_eq!(vault.get_secret(PRIMARY).unwrap().as_deref(), Some("abc123"));
}

#[test]
fn weak_parameters_are_refused_at_create() {
    let (_dir, path) = vault_path();
    let weak = Argon2Params {
        memory_kib: 1_024,
        ..fast()
    };

    let result = Vault::create(&path, b"correct-horse", Some(&weak));
    assert!(matches!(result, Err(VaultError::KeyDerivationFailed(_))));
    assert!(!path.exists());
}
