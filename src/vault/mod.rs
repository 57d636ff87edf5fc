//! Vault module: passphrase-protected credential storage.
//!
//! This module provides:
//! - `SecretRecord` and namespace metadata types (`record`)
//! - Binary store format with header integrity (`format`)
//! - `Vault` for creating, opening, and reading/writing secrets (`store`)

pub mod format;
pub mod record;
pub mod store;

pub use format::{KdfParams, StoreHeader, CURRENT_SCHEMA};
pub use record::{NamespaceInfo, SecretRecord};
pub use store::Vault;
