//! `merakiclu audit`: display the audit log.
//!
//! Usage:
//!   merakiclu audit               # show last 50 entries
//!   merakiclu audit --last 20     # show last 20
//!   merakiclu audit --since 7d    # entries from last 7 days
//!
//! The log holds no secrets, so reading it does not unlock the store.

use chrono::{DateTime, Utc};

use crate::audit::{AuditEntry, AuditLog};
use crate::cli::output;
use crate::config::Settings;
use crate::errors::{Result, VaultError};

/// Execute the `audit` command.
pub fn execute(settings: &Settings, last: usize, since: Option<&str>) -> Result<()> {
    let since_dt = since.map(parse_since).transpose()?;

    let vault_path = settings.vault_path()?;
    let Some(dir) = vault_path.parent().filter(|d| d.is_dir()) else {
        output::info("No audit entries found.");
        return Ok(());
    };
    if !AuditLog::db_path(dir).exists() {
        output::info("No audit entries found.");
        return Ok(());
    }

    let audit = AuditLog::open(dir)
        .ok_or_else(|| VaultError::AuditError("failed to open audit database".into()))?;
    let entries = audit.query(last, since_dt)?;

    if entries.is_empty() {
        output::info("No audit entries found.");
        return Ok(());
    }

    print_audit_table(&entries);

    Ok(())
}

/// Turn "7d", "24h" or "30m" into the point in time that long ago.
fn parse_since(input: &str) -> Result<DateTime<Utc>> {
    let input = input.trim();
    let invalid = |why: &str| {
        VaultError::InvalidInput(format!(
            "invalid duration '{input}': {why} (use a format like 7d, 24h or 30m)"
        ))
    };

    let Some(unit) = input.chars().last() else {
        return Err(invalid("empty"));
    };
    let num: i64 = input[..input.len() - unit.len_utf8()]
        .parse()
        .map_err(|_| invalid("number part is not valid"))?;
    if num < 0 {
        return Err(invalid("must not be negative"));
    }

    let duration = match unit {
        'd' => chrono::Duration::try_days(num),
        'h' => chrono::Duration::try_hours(num),
        'm' => chrono::Duration::try_minutes(num),
        _ => return Err(invalid("unknown unit")),
    }
    .ok_or_else(|| invalid("too large"))?;

    Utc::now()
        .checked_sub_signed(duration)
        .ok_or_else(|| invalid("too large"))
}

/// Print audit entries in a formatted table.
pub fn print_audit_table(entries: &[AuditEntry]) {
    use comfy_table::{ContentArrangement, Table};
    use console::style;

    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Time", "Operation", "Credential", "Details"]);

    for entry in entries {
        table.add_row(vec![
            entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            colorize_operation(&entry.operation),
            entry.credential.as_deref().unwrap_or("-").to_string(),
            entry.details.as_deref().unwrap_or("-").to_string(),
        ]);
    }

    println!(
        "{}",
        style(format!("{} audit entries:", entries.len())).bold()
    );
    println!("{table}");
}

fn colorize_operation(op: &str) -> String {
    use console::style;

    match op {
        "create" | "unlock" => style(op).green().to_string(),
        "set" => style(op).blue().to_string(),
        "clear" | "unlock-failed" => style(op).red().to_string(),
        "change-passphrase" => style(op).yellow().to_string(),
        _ => op.to_string(),
    }
}
