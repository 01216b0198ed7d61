use serde::{Deserialize, Serialize};

use crate::{TransferError, TransferResult};

/// Default number of ciphertext bytes carried by one frame.
///
/// Once base64-encoded and prefixed with the frame header this stays well
/// inside the binary capacity of a version 40 QR code at medium error correction.
pub const DEFAULT_MAX_FRAGMENT_SIZE: usize = 1024;

/// Largest fragment a frame may carry.
pub const MAX_FRAGMENT_SIZE: usize = 2048;

/// Default upper bound on the frame count an importer will accept.
pub const DEFAULT_MAX_TOTAL_FRAMES: u32 = 512;

/// Highest scrypt cost (`log2(N)`) accepted from configuration or from a ciphertext header.
pub const MAX_SCRYPT_LOG_N: u8 = 20;

/// Highest scrypt block size accepted from configuration or from a ciphertext header.
pub const MAX_SCRYPT_R: u32 = 32;

/// Highest scrypt parallelism accepted from configuration or from a ciphertext header.
pub const MAX_SCRYPT_P: u32 = 16;

/// Tunables shared by the export and import sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransferConfig {
    /// Ciphertext bytes per frame. Dictated by the code renderer's capacity.
    pub max_fragment_size: usize,
    /// Frame counts above this are treated as foreign codes by the importer.
    pub max_total_frames: u32,
    /// scrypt cost parameter as `log2(N)`.
    pub scrypt_log_n: u8,
    /// scrypt block size.
    pub scrypt_r: u32,
    /// scrypt parallelism.
    pub scrypt_p: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_fragment_size: DEFAULT_MAX_FRAGMENT_SIZE,
            max_total_frames: DEFAULT_MAX_TOTAL_FRAMES,
            scrypt_log_n: 15,
            scrypt_r: 8,
            scrypt_p: 1,
        }
    }
}

impl TransferConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`TransferError::InvalidInput`] if the JSON is malformed or a
    /// value is out of range.
    pub fn from_json(json: &str) -> TransferResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| TransferError::invalid_input("config", err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    /// Returns [`TransferError::InvalidInput`] naming the first offending field.
    pub fn validate(&self) -> TransferResult<()> {
        if self.max_fragment_size == 0 || self.max_fragment_size > MAX_FRAGMENT_SIZE {
            return Err(TransferError::invalid_input(
                "max_fragment_size",
                format!("must be between 1 and {MAX_FRAGMENT_SIZE}"),
            ));
        }
        if self.max_total_frames == 0 {
            return Err(TransferError::invalid_input(
                "max_total_frames",
                "must be at least 1",
            ));
        }
        if self.scrypt_log_n == 0 || self.scrypt_log_n > MAX_SCRYPT_LOG_N {
            return Err(TransferError::invalid_input(
                "scrypt_log_n",
                format!("must be between 1 and {MAX_SCRYPT_LOG_N}"),
            ));
        }
        if self.scrypt_r == 0 || self.scrypt_r > MAX_SCRYPT_R {
            return Err(TransferError::invalid_input(
                "scrypt_r",
                format!("must be between 1 and {MAX_SCRYPT_R}"),
            ));
        }
        if self.scrypt_p == 0 || self.scrypt_p > MAX_SCRYPT_P {
            return Err(TransferError::invalid_input(
                "scrypt_p",
                format!("must be between 1 and {MAX_SCRYPT_P}"),
            ));
        }
        Ok(())
    }
}
