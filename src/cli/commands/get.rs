//! `merakiclu get`: print a stored credential to stdout.

use crate::cli::open_session;
use crate::config::Settings;
use crate::errors::{Result, VaultError};
use crate::session::Credential;

/// Execute the `get` command.
pub fn execute(settings: &Settings, credential: Credential) -> Result<()> {
    let session = open_session(settings)?;

    match session.credential(credential)? {
        Some(value) => {
            println!("{}", value.as_str());
            Ok(())
        }
        None => Err(VaultError::CredentialNotSet(credential.label().to_string())),
    }
}
