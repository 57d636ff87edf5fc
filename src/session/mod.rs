//! Vault session: the single entry point the rest of the tool uses.
//!
//! A `Session` decides between first-time setup and unlock purely from
//! whether the store file exists, owns the unlocked `Vault` (and with it
//! the session key) for the rest of the process, and exposes typed
//! accessors per known credential.  Nobody outside this module sees the
//! passphrase or the key.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::crypto::kdf::Argon2Params;
use crate::errors::{Result, VaultError};
use crate::vault::Vault;

/// Shortest passphrase accepted for a new store or a passphrase change.
pub const MIN_PASSPHRASE_LEN: usize = 8;

/// The credentials the tool knows how to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum Credential {
    /// Cisco Meraki Dashboard API key.
    #[value(name = "primary")]
    PrimaryApi,
    /// IPinfo access token used by the IP lookup tool.
    #[value(name = "tool")]
    SecondaryTool,
}

impl Credential {
    pub const ALL: [Credential; 2] = [Credential::PrimaryApi, Credential::SecondaryTool];

    /// Namespace of this credential inside the store.
    pub fn namespace(self) -> &'static str {
        match self {
            Credential::PrimaryApi => "primary-api-credential",
            Credential::SecondaryTool => "secondary-tool-credential",
        }
    }

    /// Human-readable name.
    pub fn label(self) -> &'static str {
        match self {
            Credential::PrimaryApi => "Cisco Meraki API key",
            Credential::SecondaryTool => "IPinfo access token",
        }
    }
}

/// Source of passphrases.  The terminal implementation lives in
/// `cli::TerminalPrompt`; tests script their own.
pub trait PassphrasePrompt {
    /// Asked once before a missing store at `path` is created.  `false`
    /// ends the flow with `UserCancelled` and nothing is written.
    fn confirm_create(&mut self, path: &Path) -> Result<bool>;

    /// Ask for the passphrase of a store that does not exist yet.
    fn new_passphrase(&mut self) -> Result<Zeroizing<String>>;

    /// Ask for the passphrase of an existing store.  `attempt` starts at 1.
    fn passphrase(&mut self, attempt: u32) -> Result<Zeroizing<String>>;

    /// Told after a rejected passphrase, before the next `passphrase` call.
    /// `remaining` is `None` when attempts are unlimited.
    fn wrong_passphrase(&mut self, _attempt: u32, _remaining: Option<u32>) {}
}

/// Everything a session needs to know about where and how to keep the store.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub vault_path: PathBuf,
    /// Used only when a new store is created or re-keyed.
    pub argon2_params: Argon2Params,
    /// `None` retries forever.
    pub max_unlock_attempts: Option<u32>,
}

impl SessionConfig {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Ok(Self {
            vault_path: settings.vault_path()?,
            argon2_params: settings.argon2_params(),
            max_unlock_attempts: settings.unlock_attempt_limit(),
        })
    }
}

/// How the session came to be unlocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// First run: the store was just created.
    Created,
    /// The existing store was opened.
    Unlocked,
}

/// Per-credential view for status displays.  No plaintext.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialStatus {
    pub credential: Credential,
    pub is_set: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// An unlocked vault plus the typed credential API around it.
pub struct Session {
    vault: Vault,
    origin: SessionOrigin,
}

impl Session {
    /// Run first-time setup or unlock, depending on whether the store exists.
    ///
    /// Creation needs the prompt's consent, happens at most once, and any
    /// failure is returned as is;
    /// no session exists until the store is durable.  Unlock re-prompts on
    /// a wrong passphrase until the attempt limit is reached and then
    /// returns `WrongPassphrase`.  Every other error ends the flow at once.
    pub fn start(config: &SessionConfig, prompt: &mut dyn PassphrasePrompt) -> Result<Self> {
        let (vault, origin) = if config.vault_path.exists() {
            (Self::unlock(config, prompt)?, SessionOrigin::Unlocked)
        } else {
            (Self::create(config, prompt)?, SessionOrigin::Created)
        };

        let mut session = Self { vault, origin };
        for credential in Credential::ALL {
            session.vault.ensure_namespace(credential.namespace())?;
        }
        Ok(session)
    }

    fn create(config: &SessionConfig, prompt: &mut dyn PassphrasePrompt) -> Result<Vault> {
        if !prompt.confirm_create(&config.vault_path)? {
            info!(path = %config.vault_path.display(), "store creation declined");
            return Err(VaultError::UserCancelled);
        }

        let passphrase = prompt.new_passphrase()?;
        validate_new_passphrase(&passphrase)?;

        let vault = Vault::create(
            &config.vault_path,
            passphrase.as_bytes(),
            Some(&config.argon2_params),
        )?;
        info!(path = %config.vault_path.display(), "first-run setup complete");
        Ok(vault)
    }

    fn unlock(config: &SessionConfig, prompt: &mut dyn PassphrasePrompt) -> Result<Vault> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let passphrase = prompt.passphrase(attempt)?;

            match Vault::open(&config.vault_path, passphrase.as_bytes()) {
                Ok(vault) => {
                    info!(attempt, "store unlocked");
                    return Ok(vault);
                }
                Err(VaultError::WrongPassphrase) => {
                    let remaining = config
                        .max_unlock_attempts
                        .map(|max| max.saturating_sub(attempt));
                    warn!(attempt, "wrong passphrase");
                    if remaining == Some(0) {
                        return Err(VaultError::WrongPassphrase);
                    }
                    prompt.wrong_passphrase(attempt, remaining);
                }
                Err(e) => return Err(e),
            }
        }
    }

    // ------------------------------------------------------------------
    // Credential access
    // ------------------------------------------------------------------

    pub fn credential(&self, credential: Credential) -> Result<Option<Zeroizing<String>>> {
        Ok(self
            .vault
            .get_secret(credential.namespace())?
            .map(Zeroizing::new))
    }

    pub fn set_credential(&mut self, credential: Credential, value: &str) -> Result<()> {
        self.vault.set_secret(credential.namespace(), value)
    }

    /// Forget a stored credential.  Returns `false` if none was set.
    pub fn clear_credential(&mut self, credential: Credential) -> Result<bool> {
        self.vault.remove_secret(credential.namespace())
    }

    pub fn primary_credential(&self) -> Result<Option<Zeroizing<String>>> {
        self.credential(Credential::PrimaryApi)
    }

    pub fn set_primary_credential(&mut self, value: &str) -> Result<()> {
        self.set_credential(Credential::PrimaryApi, value)
    }

    pub fn tool_credential(&self) -> Result<Option<Zeroizing<String>>> {
        self.credential(Credential::SecondaryTool)
    }

    pub fn set_tool_credential(&mut self, value: &str) -> Result<()> {
        self.set_credential(Credential::SecondaryTool, value)
    }

    /// `Authorization` header value for the Dashboard API, if a key is set.
    pub fn bearer_header(&self) -> Result<Option<Zeroizing<String>>> {
        Ok(self
            .primary_credential()?
            .map(|key| Zeroizing::new(format!("Bearer {}", key.as_str()))))
    }

    /// Which credentials are set, without decrypting any of them.
    pub fn status(&self) -> Vec<CredentialStatus> {
        let namespaces = self.vault.namespaces();
        Credential::ALL
            .iter()
            .map(|&credential| {
                let updated_at = namespaces
                    .iter()
                    .find(|ns| ns.name == credential.namespace())
                    .and_then(|ns| ns.updated_at);
                CredentialStatus {
                    credential,
                    is_set: updated_at.is_some(),
                    updated_at,
                }
            })
            .collect()
    }

    /// Re-key the store under a passphrase obtained from `prompt`.
    pub fn change_passphrase(
        &mut self,
        prompt: &mut dyn PassphrasePrompt,
        argon2_params: Option<&Argon2Params>,
    ) -> Result<()> {
        let passphrase = prompt.new_passphrase()?;
        validate_new_passphrase(&passphrase)?;
        self.vault
            .change_passphrase(passphrase.as_bytes(), argon2_params)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub fn vault_path(&self) -> &Path {
        self.vault.path()
    }
}

/// Check a passphrase chosen for a new store or a passphrase change.
pub fn validate_new_passphrase(passphrase: &str) -> Result<()> {
    if passphrase.is_empty() {
        return Err(VaultError::InvalidPassphrase(
            "passphrase cannot be empty".into(),
        ));
    }
    if passphrase.chars().count() < MIN_PASSPHRASE_LEN {
        return Err(VaultError::InvalidPassphrase(format!(
            "passphrase must be at least {MIN_PASSPHRASE_LEN} characters"
        )));
    }
    Ok(())
}
