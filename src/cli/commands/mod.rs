//! One module per subcommand.

pub mod audit_cmd;
pub mod change_passphrase;
pub mod clear;
pub mod get;
pub mod set;
pub mod status;
