use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, VaultError};

/// Directory name used under the platform config and data directories.
const APP_DIR: &str = "meraki-clu";

/// File name of the credential store.
const STORE_FILE: &str = "credentials.vault";

/// User configuration, loaded from `<config_dir>/meraki-clu/config.toml`.
///
/// Every field has a sensible default so the tool works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Where the credential store lives. Defaults to
    /// `<data_dir>/meraki-clu/credentials.vault`.
    #[serde(default)]
    pub vault_path: Option<PathBuf>,

    /// Argon2 memory cost in KiB for new stores (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count for new stores (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree for new stores (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// Passphrase attempts before unlock gives up; `0` means unlimited.
    #[serde(default = "default_max_unlock_attempts")]
    pub max_unlock_attempts: u32,

    /// Log level for this crate when `MERAKI_CLU_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_max_unlock_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "warn".to_string()
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            vault_path: None,
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            max_unlock_attempts: default_max_unlock_attempts(),
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings from `config_path`.
    ///
    /// If the file does not exist, defaults are returned.
    /// If the file exists but cannot be read or parsed, an error is returned.
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(config_path).map_err(|e| {
            VaultError::ConfigError(format!("Failed to read {}: {e}", config_path.display()))
        })?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            VaultError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    /// The default config file location for this platform.
    pub fn default_config_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join("config.toml"))
            .ok_or_else(|| {
                VaultError::ConfigError("cannot determine the user config directory".into())
            })
    }

    /// The credential store path: the configured one, or the platform default.
    pub fn vault_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.vault_path {
            return Ok(path.clone());
        }
        dirs::data_dir()
            .map(|dir| dir.join(APP_DIR).join(STORE_FILE))
            .ok_or_else(|| {
                VaultError::StorageUnavailable("cannot determine the user data directory".into())
            })
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn argon2_params(&self) -> crate::crypto::kdf::Argon2Params {
        crate::crypto::kdf::Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }

    /// Unlock attempt limit, `None` meaning unlimited.
    pub fn unlock_attempt_limit(&self) -> Option<u32> {
        match self.max_unlock_attempts {
            0 => None,
            n => Some(n),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────
