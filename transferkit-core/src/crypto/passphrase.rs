//! Passphrase-based reference authorizer.
//!
//! # Ciphertext layout
//!
//! ```text
//! version:  u8  (= 1)
//! log_n:    u8  (scrypt cost)
//! r:        u32 (big-endian)
//! p:        u32 (big-endian)
//! salt:     [u8; 16]
//! nonce:    [u8; 24]
//! sealed:   XChaCha20-Poly1305(key = scrypt(secret, salt), aad = LABEL)
//! ```
//!
//! The scrypt parameters travel with the ciphertext so an importer with a
//! different local configuration can still open it. They are bounded on the
//! way in so a hostile header cannot request unbounded work.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use rand::{rngs::OsRng, RngCore};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use super::{AuthError, AuthMethod, AuthToken, Authorizer};
use crate::config::{TransferConfig, MAX_SCRYPT_LOG_N, MAX_SCRYPT_P, MAX_SCRYPT_R};
use crate::TransferResult;

const CIPHERTEXT_VERSION: u8 = 1;
const LABEL_ACCOUNT_TRANSFER: &[u8] = b"transferkit:account-transfer";
const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 24;
const KEY_LEN: usize = 32;
const TAG_LEN: usize = 16;
const HEADER_LEN: usize = 1 + 1 + 4 + 4 + SALT_LEN + NONCE_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CostParams {
    log_n: u8,
    r: u32,
    p: u32,
}

struct Verifier {
    salt: [u8; SALT_LEN],
    hash: Zeroizing<[u8; KEY_LEN]>,
}

/// Authorizer backed by a passphrase, with an optional biometric unlock of it.
///
/// On the exporting device it is built [`with_passphrase`](Self::with_passphrase)
/// so `authorize` checks the passphrase against a verifier. On the importing
/// device no verifier exists yet: any non-empty passphrase yields a token and
/// a wrong one surfaces as [`AuthError::Rejected`] when the payload is opened.
///
/// A biometric check unlocks the passphrase stored on the device, so payloads
/// sealed after either method open with the passphrase the user types on the
/// other device.
pub struct PassphraseAuthorizer {
    cost: CostParams,
    verifier: Option<Verifier>,
    stored_passphrase: Option<SecretString>,
    outstanding: Mutex<HashSet<u64>>,
}

impl std::fmt::Debug for PassphraseAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassphraseAuthorizer")
            .field("cost", &self.cost)
            .field("verifier", &self.verifier.is_some())
            .field("biometric", &self.stored_passphrase.is_some())
            .finish_non_exhaustive()
    }
}

impl PassphraseAuthorizer {
    /// Creates an authorizer without a verifier, as used on the importing device.
    ///
    /// # Errors
    /// Returns an error if the scrypt settings in `config` are invalid.
    pub fn new(config: &TransferConfig) -> TransferResult<Self> {
        config.validate()?;
        Ok(Self {
            cost: CostParams {
                log_n: config.scrypt_log_n,
                r: config.scrypt_r,
                p: config.scrypt_p,
            },
            verifier: None,
            stored_passphrase: None,
            outstanding: Mutex::new(HashSet::new()),
        })
    }

    /// Requires `authorize` to present this passphrase.
    ///
    /// # Errors
    /// Returns an error if key derivation fails.
    pub fn with_passphrase(mut self, passphrase: &SecretString) -> Result<Self, AuthError> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let hash = derive_key(passphrase.expose_secret().as_bytes(), &salt, self.cost)?;
        self.verifier = Some(Verifier { salt, hash });
        Ok(self)
    }

    /// Enables [`AuthMethod::Biometric`]: once the platform prompt succeeds
    /// the account passphrase held in the device keystore is unlocked and used
    /// as the token secret.
    ///
    /// # Errors
    /// Returns [`AuthError::Rejected`] if a verifier is set and `passphrase`
    /// does not match it.
    pub async fn with_biometric_unlock(
        mut self,
        passphrase: SecretString,
    ) -> Result<Self, AuthError> {
        if passphrase.expose_secret().is_empty() {
            return Err(AuthError::Rejected);
        }
        self.check_passphrase(&passphrase).await?;
        self.stored_passphrase = Some(passphrase);
        Ok(self)
    }

    /// Number of issued tokens not yet released.
    #[must_use]
    pub fn outstanding_tokens(&self) -> usize {
        self.outstanding.lock().map_or(0, |set| set.len())
    }

    fn issue(&self, secret: Vec<u8>) -> AuthToken {
        let token = AuthToken::new(secret);
        if let Ok(mut set) = self.outstanding.lock() {
            set.insert(token.id());
        }
        token
    }

    fn ensure_outstanding(&self, token: &AuthToken) -> Result<(), AuthError> {
        let set = self
            .outstanding
            .lock()
            .map_err(|_| AuthError::Crypto("token registry poisoned".to_string()))?;
        if set.contains(&token.id()) {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        }
    }

    async fn check_passphrase(&self, passphrase: &SecretString) -> Result<(), AuthError> {
        let Some(verifier) = &self.verifier else {
            return Ok(());
        };
        let secret = Zeroizing::new(passphrase.expose_secret().as_bytes().to_vec());
        let derived = derive_key_blocking(secret, verifier.salt, self.cost).await?;
        if bool::from(derived[..].ct_eq(&verifier.hash[..])) {
            Ok(())
        } else {
            Err(AuthError::Rejected)
        }
    }
}

#[async_trait]
impl Authorizer for PassphraseAuthorizer {
    async fn authorize(&self, method: AuthMethod) -> Result<AuthToken, AuthError> {
        match method {
            AuthMethod::Passphrase(passphrase) => {
                if passphrase.expose_secret().is_empty() {
                    return Err(AuthError::Rejected);
                }
                self.check_passphrase(&passphrase).await?;
                Ok(self.issue(passphrase.expose_secret().as_bytes().to_vec()))
            }
            AuthMethod::Biometric => {
                let passphrase = self.stored_passphrase.as_ref().ok_or_else(|| {
                    AuthError::Unavailable("no biometric unlock on this device".to_string())
                })?;
                Ok(self.issue(passphrase.expose_secret().as_bytes().to_vec()))
            }
        }
    }

    fn release(&self, token: &AuthToken) {
        if let Ok(mut set) = self.outstanding.lock() {
            set.remove(&token.id());
        }
    }

    async fn encrypt_with_token(
        &self,
        plaintext: &[u8],
        token: &AuthToken,
    ) -> Result<Vec<u8>, AuthError> {
        self.ensure_outstanding(token)?;

        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let secret = Zeroizing::new(token.expose_secret().to_vec());
        let key = derive_key_blocking(secret, salt, self.cost).await?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad: LABEL_ACCOUNT_TRANSFER,
                },
            )
            .map_err(|err| AuthError::Crypto(err.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_LEN + sealed.len());
        out.push(CIPHERTEXT_VERSION);
        out.push(self.cost.log_n);
        out.extend_from_slice(&self.cost.r.to_be_bytes());
        out.extend_from_slice(&self.cost.p.to_be_bytes());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    async fn decrypt_with_token(
        &self,
        ciphertext: &[u8],
        token: &AuthToken,
    ) -> Result<Zeroizing<Vec<u8>>, AuthError> {
        self.ensure_outstanding(token)?;

        let header = parse_header(ciphertext)?;
        let secret = Zeroizing::new(token.expose_secret().to_vec());
        let key = derive_key_blocking(secret, header.salt, header.cost).await?;
        let cipher = XChaCha20Poly1305::new(Key::from_slice(&key[..]));
        cipher
            .decrypt(
                XNonce::from_slice(&header.nonce),
                Payload {
                    msg: &ciphertext[HEADER_LEN..],
                    aad: LABEL_ACCOUNT_TRANSFER,
                },
            )
            .map(Zeroizing::new)
            .map_err(|_| AuthError::Rejected)
    }
}

struct Header {
    cost: CostParams,
    salt: [u8; SALT_LEN],
    nonce: [u8; NONCE_LEN],
}

fn parse_header(ciphertext: &[u8]) -> Result<Header, AuthError> {
    if ciphertext.len() < HEADER_LEN + TAG_LEN {
        return Err(AuthError::MalformedCiphertext(format!(
            "expected at least {} bytes, got {}",
            HEADER_LEN + TAG_LEN,
            ciphertext.len()
        )));
    }
    if ciphertext[0] != CIPHERTEXT_VERSION {
        return Err(AuthError::MalformedCiphertext(format!(
            "unknown ciphertext version {}",
            ciphertext[0]
        )));
    }

    let log_n = ciphertext[1];
    let r = u32::from_be_bytes([ciphertext[2], ciphertext[3], ciphertext[4], ciphertext[5]]);
    let p = u32::from_be_bytes([ciphertext[6], ciphertext[7], ciphertext[8], ciphertext[9]]);
    if log_n == 0
        || log_n > MAX_SCRYPT_LOG_N
        || r == 0
        || r > MAX_SCRYPT_R
        || p == 0
        || p > MAX_SCRYPT_P
    {
        return Err(AuthError::MalformedCiphertext(
            "scrypt parameters out of range".to_string(),
        ));
    }

    let mut salt = [0u8; SALT_LEN];
    salt.copy_from_slice(&ciphertext[10..10 + SALT_LEN]);
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&ciphertext[10 + SALT_LEN..HEADER_LEN]);

    Ok(Header {
        cost: CostParams { log_n, r, p },
        salt,
        nonce,
    })
}

fn derive_key(
    secret: &[u8],
    salt: &[u8],
    cost: CostParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, AuthError> {
    let params = scrypt::Params::new(cost.log_n, cost.r, cost.p, KEY_LEN)
        .map_err(|err| AuthError::Crypto(err.to_string()))?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    scrypt::scrypt(secret, salt, &params, &mut key[..])
        .map_err(|err| AuthError::Crypto(err.to_string()))?;
    Ok(key)
}

/// Runs scrypt off the async executor.
async fn derive_key_blocking(
    secret: Zeroizing<Vec<u8>>,
    salt: [u8; SALT_LEN],
    cost: CostParams,
) -> Result<Zeroizing<[u8; KEY_LEN]>, AuthError> {
    tokio::task::spawn_blocking(move || derive_key(&secret, &salt, cost))
        .await
        .map_err(|err| AuthError::Crypto(err.to_string()))?
}
