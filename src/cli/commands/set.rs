//! `merakiclu set`: add or replace a credential in the store.

use std::io::{self, IsTerminal, Read};

use zeroize::Zeroizing;

use crate::cli::output;
use crate::cli::open_session;
use crate::config::Settings;
use crate::errors::{Result, VaultError};
use crate::session::Credential;

/// Execute the `set` command.
pub fn execute(settings: &Settings, credential: Credential, value: Option<&str>) -> Result<()> {
    let label = credential.label();

    let secret_value = if let Some(v) = value {
        // Inline value on the command line.
        output::warning("Value provided on the command line may appear in shell history.");
        Zeroizing::new(v.to_string())
    } else if !io::stdin().is_terminal() {
        // Piped input.
        let mut buf = Zeroizing::new(String::new());
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|e| VaultError::PromptFailed(format!("reading stdin: {e}")))?;
        Zeroizing::new(buf.trim().to_string())
    } else {
        let v = dialoguer::Password::new()
            .with_prompt(format!("Enter the {label}"))
            .interact()
            .map_err(|e| VaultError::PromptFailed(format!("input prompt: {e}")))?;
        Zeroizing::new(v.trim().to_string())
    };

    if secret_value.is_empty() {
        return Err(VaultError::InvalidInput(format!("the {label} cannot be empty")));
    }

    let mut session = open_session(settings)?;

    let existed = session
        .status()
        .iter()
        .any(|s| s.credential == credential && s.is_set);
    session.set_credential(credential, &secret_value)?;

    let op_detail = if existed { "updated" } else { "added" };
    let credential_name = credential_arg(credential);
    crate::audit::log_audit(
        session.vault_path(),
        "set",
        Some(credential_name),
        Some(op_detail),
    );

    output::success(&format!("{label} {op_detail}."));

    Ok(())
}

/// The command-line spelling of a credential, as used in the audit log.
pub(crate) fn credential_arg(credential: Credential) -> &'static str {
    match credential {
        Credential::PrimaryApi => "primary",
        Credential::SecondaryTool => "tool",
    }
}
