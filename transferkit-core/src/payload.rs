//! Transfer payload and its canonical byte layout.
//!
//! # Layout
//!
//! ```text
//! schema_version: u32 (big-endian)
//! body: CBOR map
//!     private_key: text (armored)
//!     fingerprint: text
//!     domain:      text
//!     user_id:     text
//!     first_name:  text
//!     last_name:   text
//!     username:    text
//! ```
//!
//! The version prefix sits outside the CBOR body so a decoder can refuse a
//! newer schema before it looks at anything else.

use std::fmt;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::{TransferError, TransferResult};

// =============================================================================
// Constants
// =============================================================================

/// Current payload schema version.
pub const PAYLOAD_VERSION: u32 = 1;

const VERSION_PREFIX_LEN: usize = 4;

// =============================================================================
// Types
// =============================================================================

/// Identity of an account: the server domain plus the user identifier on it.
///
/// Two accounts with the same identity are the same account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AccountIdentity {
    /// Server domain, URL-like (`https://cloud.example.com`).
    pub domain: String,
    /// User identifier on that server.
    pub user_id: String,
}

impl AccountIdentity {
    /// Creates an identity.
    #[must_use]
    pub fn new(domain: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            user_id: user_id.into(),
        }
    }
}

impl fmt::Display for AccountIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user_id, self.domain)
    }
}

/// Display fields of the account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountProfile {
    /// Given name.
    pub first_name: String,
    /// Family name.
    pub last_name: String,
    /// Login name.
    pub username: String,
}

/// Credential material held by a provisioned client, ready to be exported.
#[derive(Debug)]
pub struct AccountCredentials {
    /// Armored private key, still wrapped by the account passphrase.
    pub private_key: SecretString,
    /// Fingerprint of the matching public key.
    pub fingerprint: String,
    /// Account identity.
    pub identity: AccountIdentity,
    /// Display profile.
    pub profile: AccountProfile,
}

/// The plaintext carried across the optical channel.
///
/// Immutable once built: the export session builds one per transfer and the
/// import session decodes one per transfer.
#[derive(Debug)]
pub struct TransferPayload {
    version: u32,
    private_key: SecretString,
    fingerprint: String,
    identity: AccountIdentity,
    profile: AccountProfile,
}

/// Non-secret view of a decoded payload, for confirmation screens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadSummary {
    /// Account identity.
    pub identity: AccountIdentity,
    /// Display profile.
    pub profile: AccountProfile,
    /// Public key fingerprint.
    pub fingerprint: String,
}

/// Failures decoding a reassembled payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The payload was written by a newer (or unknown) schema.
    #[error("unsupported payload version {found}, this build supports up to {supported}")]
    UnsupportedVersion {
        /// Version found in the prefix.
        found: u32,
        /// Highest version this build understands.
        supported: u32,
    },
    /// The buffer ends before the version prefix.
    #[error("payload is truncated")]
    Truncated,
    /// The body is not valid CBOR for the declared version.
    #[error("malformed payload: {0}")]
    Malformed(String),
    /// A required field is empty.
    #[error("payload field `{0}` is empty")]
    MissingField(&'static str),
}

/// Wire form of the body. Zeroized on drop since it holds the armored key.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct PayloadBody {
    private_key: String,
    fingerprint: String,
    domain: String,
    user_id: String,
    first_name: String,
    last_name: String,
    username: String,
}

// =============================================================================
// TransferPayload
// =============================================================================

impl TransferPayload {
    /// Builds a payload at the current schema version.
    #[must_use]
    pub fn new(
        private_key: SecretString,
        fingerprint: impl Into<String>,
        identity: AccountIdentity,
        profile: AccountProfile,
    ) -> Self {
        Self {
            version: PAYLOAD_VERSION,
            private_key,
            fingerprint: fingerprint.into(),
            identity,
            profile,
        }
    }

    /// Builds a payload from the exporting client's credentials.
    #[must_use]
    pub fn from_credentials(credentials: &AccountCredentials) -> Self {
        Self::new(
            SecretString::from(credentials.private_key.expose_secret().to_owned()),
            credentials.fingerprint.clone(),
            credentials.identity.clone(),
            credentials.profile.clone(),
        )
    }

    /// Schema version the payload was built or decoded with.
    #[must_use]
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// Armored private key. Treat as sensitive material.
    #[must_use]
    pub const fn private_key(&self) -> &SecretString {
        &self.private_key
    }

    /// Public key fingerprint.
    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Account identity.
    #[must_use]
    pub const fn identity(&self) -> &AccountIdentity {
        &self.identity
    }

    /// Display profile.
    #[must_use]
    pub const fn profile(&self) -> &AccountProfile {
        &self.profile
    }

    /// Returns the fields that are safe to show.
    #[must_use]
    pub fn summary(&self) -> PayloadSummary {
        PayloadSummary {
            identity: self.identity.clone(),
            profile: self.profile.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }

    /// Serializes the payload. Deterministic for equal payloads.
    ///
    /// # Errors
    /// Returns [`TransferError::InvalidInput`] if serialization fails.
    pub fn encode(&self) -> TransferResult<Zeroizing<Vec<u8>>> {
        let body = PayloadBody {
            private_key: self.private_key.expose_secret().to_owned(),
            fingerprint: self.fingerprint.clone(),
            domain: self.identity.domain.clone(),
            user_id: self.identity.user_id.clone(),
            first_name: self.profile.first_name.clone(),
            last_name: self.profile.last_name.clone(),
            username: self.profile.username.clone(),
        };

        let mut bytes = Zeroizing::new(Vec::with_capacity(VERSION_PREFIX_LEN + 256));
        bytes.extend_from_slice(&self.version.to_be_bytes());
        ciborium::ser::into_writer(&body, &mut *bytes)
            .map_err(|err| TransferError::invalid_input("payload", err.to_string()))?;
        Ok(bytes)
    }

    /// Parses a payload, checking the schema version before the body.
    ///
    /// # Errors
    /// Returns [`DecodeError::UnsupportedVersion`] for an unknown version
    /// without parsing further, and other [`DecodeError`]s for a bad body.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (prefix, rest) = bytes
            .split_first_chunk::<VERSION_PREFIX_LEN>()
            .ok_or(DecodeError::Truncated)?;
        let version = u32::from_be_bytes(*prefix);
        if version == 0 || version > PAYLOAD_VERSION {
            return Err(DecodeError::UnsupportedVersion {
                found: version,
                supported: PAYLOAD_VERSION,
            });
        }

        let mut body: PayloadBody = ciborium::de::from_reader(rest)
            .map_err(|err| DecodeError::Malformed(err.to_string()))?;

        if body.private_key.is_empty() {
            return Err(DecodeError::MissingField("private_key"));
        }
        if body.domain.is_empty() {
            return Err(DecodeError::MissingField("domain"));
        }
        if body.user_id.is_empty() {
            return Err(DecodeError::MissingField("user_id"));
        }

        Ok(Self {
            version,
            private_key: SecretString::from(std::mem::take(&mut body.private_key)),
            fingerprint: std::mem::take(&mut body.fingerprint),
            identity: AccountIdentity {
                domain: std::mem::take(&mut body.domain),
                user_id: std::mem::take(&mut body.user_id),
            },
            profile: AccountProfile {
                first_name: std::mem::take(&mut body.first_name),
                last_name: std::mem::take(&mut body.last_name),
                username: std::mem::take(&mut body.username),
            },
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
