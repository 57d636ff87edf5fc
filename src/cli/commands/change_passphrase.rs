//! `merakiclu change-passphrase`: re-key the credential store.
//!
//! Unlocks with the current passphrase, decrypts every credential,
//! derives a new key from a fresh salt and the new passphrase, and
//! writes the re-sealed store atomically.

use crate::cli::output;
use crate::cli::{open_session, TerminalPrompt};
use crate::config::Settings;
use crate::errors::Result;

/// Execute the `change-passphrase` command.
pub fn execute(settings: &Settings) -> Result<()> {
    output::info("Enter your current passphrase.");
    let mut session = open_session(settings)?;

    output::info("Choose your new passphrase.");
    let params = settings.argon2_params();
    session.change_passphrase(&mut TerminalPrompt, Some(&params))?;

    crate::audit::log_audit(session.vault_path(), "change-passphrase", None, None);
    output::success("Passphrase changed.");

    Ok(())
}
