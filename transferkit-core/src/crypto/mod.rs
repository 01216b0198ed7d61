//! Authorization primitive consumed by the sessions.
//!
//! Sessions never handle key material directly. They ask an [`Authorizer`]
//! for an [`AuthToken`] and hand that token back to the same authorizer to
//! wrap or unwrap payload bytes. Platforms provide their own implementation
//! (keychain, biometric prompt, OpenPGP backend); [`PassphraseAuthorizer`]
//! is the portable reference one.

use std::fmt;

use async_trait::async_trait;
use rand::{rngs::OsRng, RngCore};
use secrecy::SecretString;
use thiserror::Error;
use zeroize::Zeroizing;

mod passphrase;

pub use passphrase::PassphraseAuthorizer;

/// How the user proves they may use the account key.
#[derive(Debug)]
pub enum AuthMethod {
    /// The account passphrase.
    Passphrase(SecretString),
    /// A device biometric check unlocking the stored account passphrase.
    Biometric,
}

impl AuthMethod {
    /// Convenience constructor for a passphrase.
    #[must_use]
    pub fn passphrase(passphrase: impl Into<String>) -> Self {
        Self::Passphrase(SecretString::from(passphrase.into()))
    }

    /// Short label for logs. Never includes secret material.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Passphrase(_) => "passphrase",
            Self::Biometric => "biometric",
        }
    }
}

/// Proof of a successful authorization, bound to the authorizer that issued it.
///
/// The secret is zeroized on drop and never printed.
pub struct AuthToken {
    id: u64,
    secret: Zeroizing<Vec<u8>>,
}

impl AuthToken {
    /// Wraps secret material in a fresh token with a random id.
    #[must_use]
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            id: OsRng.next_u64(),
            secret: Zeroizing::new(secret),
        }
    }

    /// Identifier used by authorizers to track outstanding tokens.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Secret material. Only authorizers should read this.
    #[must_use]
    pub fn expose_secret(&self) -> &[u8] {
        &self.secret
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("id", &self.id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Failures of the authorization primitive.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong passphrase, denied biometric prompt, or a token that cannot open the ciphertext.
    #[error("authorization rejected")]
    Rejected,
    /// The requested method is not available on this device.
    #[error("authorization method unavailable: {0}")]
    Unavailable(String),
    /// The ciphertext is truncated or has an unknown header.
    #[error("malformed ciphertext: {0}")]
    MalformedCiphertext(String),
    /// The cryptographic backend failed.
    #[error("crypto error: {0}")]
    Crypto(String),
}

/// Authorization and payload wrapping, provided by the platform.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Checks the user's credentials and returns a token for this session.
    ///
    /// # Errors
    /// Returns [`AuthError::Rejected`] for a wrong passphrase or denied prompt.
    async fn authorize(&self, method: AuthMethod) -> Result<AuthToken, AuthError>;

    /// Releases a token and any session extension it holds. Idempotent.
    fn release(&self, token: &AuthToken);

    /// Wraps `plaintext` under the token.
    ///
    /// # Errors
    /// Returns an error if the backend cannot encrypt.
    async fn encrypt_with_token(
        &self,
        plaintext: &[u8],
        token: &AuthToken,
    ) -> Result<Vec<u8>, AuthError>;

    /// Unwraps `ciphertext` with the token.
    ///
    /// # Errors
    /// Returns [`AuthError::Rejected`] if the token does not open the ciphertext
    /// and [`AuthError::MalformedCiphertext`] if the ciphertext is damaged.
    async fn decrypt_with_token(
        &self,
        ciphertext: &[u8],
        token: &AuthToken,
    ) -> Result<Zeroizing<Vec<u8>>, AuthError>;
}
