//! `merakiclu clear`: remove a stored credential.

use dialoguer::Confirm;

use crate::cli::commands::set::credential_arg;
use crate::cli::open_session;
use crate::cli::output;
use crate::config::Settings;
use crate::errors::{Result, VaultError};
use crate::session::Credential;

/// Execute the `clear` command.
pub fn execute(settings: &Settings, credential: Credential, force: bool) -> Result<()> {
    let label = credential.label();

    // Unless --force is set, ask for confirmation before removing.
    if !force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Remove the stored {label}?"))
            .default(false)
            .interact()
            .map_err(|e| VaultError::PromptFailed(format!("confirm prompt: {e}")))?;

        if !confirmed {
            output::info("Cancelled.");
            return Ok(());
        }
    }

    let mut session = open_session(settings)?;

    if session.clear_credential(credential)? {
        crate::audit::log_audit(
            session.vault_path(),
            "clear",
            Some(credential_arg(credential)),
            None,
        );
        output::success(&format!("Removed the stored {label}."));
    } else {
        output::info(&format!("No {label} was stored."));
    }

    Ok(())
}
