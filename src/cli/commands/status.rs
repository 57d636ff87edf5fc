//! `merakiclu status`: create or unlock the store and show what it holds.

use crate::cli::output;
use crate::cli::open_session;
use crate::config::Settings;
use crate::errors::Result;
use crate::session::Credential;

/// Execute the `status` command (also the default with no subcommand).
pub fn execute(settings: &Settings) -> Result<()> {
    let session = open_session(settings)?;

    let statuses = session.status();
    output::print_status_table(&statuses);

    let primary_set = statuses
        .iter()
        .any(|s| s.credential == Credential::PrimaryApi && s.is_set);
    if !primary_set {
        output::tip("Run `merakiclu set primary` to store your Cisco Meraki API key.");
    }

    Ok(())
}
