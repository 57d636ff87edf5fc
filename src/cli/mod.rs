//! CLI module: Clap argument parser, terminal prompts, output helpers,
//! and command implementations.

pub mod commands;
pub mod output;

use std::path::{Path, PathBuf};

use clap::Parser;
use zeroize::Zeroizing;

use crate::config::Settings;
use crate::errors::{Result, VaultError};
use crate::session::{
    validate_new_passphrase, Credential, PassphrasePrompt, Session, SessionConfig, SessionOrigin,
};

/// Cisco Meraki CLU: command line utility for Meraki network administrators.
#[derive(Parser)]
#[command(
    name = "merakiclu",
    about = "Cisco Meraki command line utility with an encrypted credential store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file (default: <config dir>/meraki-clu/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Credential store file (overrides the config file)
    #[arg(long, global = true)]
    pub vault: Option<PathBuf>,
}

/// All available subcommands.  Without one, `status` runs.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Create or unlock the credential store and show which credentials are set
    Status,

    /// Store a credential (add or replace)
    Set {
        /// Which credential: primary (Meraki API key) or tool (IPinfo token)
        #[arg(value_enum)]
        credential: Credential,
        /// Credential value (omit for a hidden prompt)
        value: Option<String>,
    },

    /// Print a stored credential
    Get {
        /// Which credential: primary or tool
        #[arg(value_enum)]
        credential: Credential,
    },

    /// Remove a stored credential
    Clear {
        /// Which credential: primary or tool
        #[arg(value_enum)]
        credential: Credential,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Change the credential store passphrase
    ChangePassphrase,

    /// View the audit log of credential store operations
    Audit {
        /// Number of entries to show (default: 50)
        #[arg(long, default_value = "50")]
        last: usize,
        /// Show entries since a duration ago (e.g. 7d, 24h, 30m)
        #[arg(long)]
        since: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Shared helpers used by multiple commands
// ---------------------------------------------------------------------------

/// Load settings from `--config` (or the default location) and apply
/// `--vault` on top.
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => Settings::default_config_path()?,
    };
    let mut settings = Settings::load(&config_path)?;
    if let Some(vault) = &cli.vault {
        settings.vault_path = Some(vault.clone());
    }
    Ok(settings)
}

/// Start the vault session with terminal prompts, recording the outcome
/// in the audit log.
pub fn open_session(settings: &Settings) -> Result<Session> {
    let config = SessionConfig::from_settings(settings)?;
    let mut prompt = TerminalPrompt;

    match Session::start(&config, &mut prompt) {
        Ok(session) => {
            match session.origin() {
                SessionOrigin::Created => {
                    crate::audit::log_audit(
                        &config.vault_path,
                        "create",
                        None,
                        Some("credential store created"),
                    );
                    output::success(&format!(
                        "Credential store created at {}",
                        config.vault_path.display()
                    ));
                    output::warning(
                        "Keep your passphrase somewhere safe: it cannot be recovered.",
                    );
                }
                SessionOrigin::Unlocked => {
                    crate::audit::log_audit(&config.vault_path, "unlock", None, None);
                }
            }
            Ok(session)
        }
        Err(e) => {
            if matches!(e, VaultError::WrongPassphrase) {
                crate::audit::log_audit(
                    &config.vault_path,
                    "unlock-failed",
                    None,
                    Some("attempts exhausted"),
                );
            }
            Err(e)
        }
    }
}

/// Non-echoing passphrase prompts on the controlling terminal.
pub struct TerminalPrompt;

impl PassphrasePrompt for TerminalPrompt {
    fn confirm_create(&mut self, path: &Path) -> Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(format!(
                "No credential store found at {}. Create one now?",
                path.display()
            ))
            .default(true)
            .interact()
            .map_err(|e| VaultError::PromptFailed(format!("confirm prompt: {e}")))
    }

    fn new_passphrase(&mut self) -> Result<Zeroizing<String>> {
        output::info("A passphrase protects the stored Meraki API key and tool tokens.");

        loop {
            let passphrase = dialoguer::Password::new()
                .with_prompt("Choose a passphrase")
                .with_confirmation(
                    "Confirm passphrase",
                    "Passphrases do not match, try again",
                )
                .interact()
                .map_err(|e| VaultError::PromptFailed(format!("passphrase prompt: {e}")))?;
            let passphrase = Zeroizing::new(passphrase);

            if let Err(e) = validate_new_passphrase(&passphrase) {
                output::warning(&format!("{e}. Try again."));
                continue;
            }

            return Ok(passphrase);
        }
    }

    fn passphrase(&mut self, _attempt: u32) -> Result<Zeroizing<String>> {
        let passphrase = dialoguer::Password::new()
            .with_prompt("Enter the credential store passphrase")
            .interact()
            .map_err(|e| VaultError::PromptFailed(format!("passphrase prompt: {e}")))?;
        Ok(Zeroizing::new(passphrase))
    }

    fn wrong_passphrase(&mut self, _attempt: u32, remaining: Option<u32>) {
        match remaining {
            Some(1) => output::error("Wrong passphrase. 1 attempt left."),
            Some(n) => output::error(&format!("Wrong passphrase. {n} attempts left.")),
            None => output::error("Wrong passphrase. Try again."),
        }
    }
}
