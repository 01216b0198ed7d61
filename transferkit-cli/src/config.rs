//! Configuration layering for the CLI.
//!
//! Precedence: defaults < JSON config file < environment / flags.

use std::path::{Path, PathBuf};

use eyre::{Result, WrapErr};
use transferkit_core::TransferConfig;

/// `<config dir>/transferkit/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("transferkit").join("config.json"))
}

/// `<data dir>/transferkit`, where imported accounts are stored by default.
pub fn default_store_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("transferkit")
}

/// Values given on the command line or through `TRANSFERKIT_*` variables.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub fragment_size: Option<usize>,
    pub scrypt_log_n: Option<u8>,
}

/// Resolves the effective configuration.
///
/// An explicit path must exist; the default path is only read when present.
pub fn load(explicit: Option<&Path>, overrides: &Overrides) -> Result<TransferConfig> {
    let path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => default_config_path().filter(|path| path.exists()),
    };

    let mut config = match path {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
            tracing::debug!(path = %path.display(), "loaded config file");
            TransferConfig::from_json(&json)
                .wrap_err_with(|| format!("invalid config {}", path.display()))?
        }
        None => TransferConfig::default(),
    };

    if let Some(size) = overrides.fragment_size {
        config.max_fragment_size = size;
    }
    if let Some(log_n) = overrides.scrypt_log_n {
        config.scrypt_log_n = log_n;
    }
    config.validate().wrap_err("invalid configuration")?;
    Ok(config)
}
