use std::path::PathBuf;
use thiserror::Error;

/// All errors that can occur in the credential vault and the CLI around it.
#[derive(Debug, Error)]
pub enum VaultError {
    // --- Storage errors ---
    #[error("Credential store unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Credential store not found at {0}")]
    VaultNotFound(PathBuf),

    #[error("Credential store already exists at {0}")]
    VaultAlreadyExists(PathBuf),

    #[error("Credential store is corrupt: {0} (manual intervention required, retyping the passphrase will not help)")]
    StoreCorrupt(String),

    // --- Crypto errors ---
    #[error("Wrong passphrase: the credential store could not be unlocked")]
    WrongPassphrase,

    #[error("Stored secret '{0}' failed to decrypt and cannot be trusted")]
    DecryptionFailed(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Input errors ---
    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Invalid passphrase: {0}")]
    InvalidPassphrase(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("No {0} is stored yet")]
    CredentialNotSet(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- CLI errors ---
    #[error("Prompt failed: {0}")]
    PromptFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,

    #[error("Audit error: {0}")]
    AuditError(String),
}

impl VaultError {
    /// Whether the caller may reasonably retry or continue the session.
    ///
    /// Fatal errors (unusable storage, corrupt store, broken config) must
    /// stop the calling flow.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VaultError::WrongPassphrase
                | VaultError::DecryptionFailed(_)
                | VaultError::InvalidNamespace(_)
                | VaultError::InvalidPassphrase(_)
                | VaultError::InvalidInput(_)
                | VaultError::CredentialNotSet(_)
                | VaultError::UserCancelled
        )
    }
}

/// Convenience type alias for vault results.
pub type Result<T> = std::result::Result<T, VaultError>;
