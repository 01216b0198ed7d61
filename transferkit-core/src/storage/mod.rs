//! Account storage interface.
//!
//! Persisting the imported account is the platform's job. The import session
//! only asks whether an identity already exists and, once the user confirms,
//! commits the decoded payload.
//!
//! # Commit contract
//!
//! `commit_account` is the single commit point of a transfer. Implementations
//! must make it atomic: if the returned future is dropped before it resolves,
//! no account may remain. `remove_account` is used to roll back a commit that
//! resolved after the user had already cancelled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::AuthMethod;
use crate::payload::{AccountIdentity, TransferPayload};

pub mod memory;

pub use memory::MemoryAccountStorage;

/// Handle to a committed account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountHandle {
    /// Storage-assigned identifier.
    pub id: String,
    /// Identity of the stored account.
    pub identity: AccountIdentity,
}

/// Errors raised by account storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An account with this identity is already stored.
    #[error("account already exists: {0}")]
    AlreadyExists(AccountIdentity),
    /// No account with this handle is stored.
    #[error("account not found: {0}")]
    NotFound(String),
    /// Filesystem failure.
    #[error("I/O error during {context}: {source}")]
    Io {
        /// Operation that failed.
        context: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Local account persistence, provided by the platform.
#[async_trait]
pub trait AccountStorage: Send + Sync {
    /// Whether an account with `identity` is already stored.
    ///
    /// # Errors
    /// Returns an error if the store cannot be queried.
    async fn account_exists(&self, identity: &AccountIdentity) -> Result<bool, StorageError>;

    /// Persists the account, re-wrapping its key under `local`.
    ///
    /// # Errors
    /// Returns [`StorageError::AlreadyExists`] if the identity is taken, or a
    /// backend error. On error nothing is persisted.
    async fn commit_account(
        &self,
        payload: TransferPayload,
        local: AuthMethod,
    ) -> Result<AccountHandle, StorageError>;

    /// Deletes a committed account.
    ///
    /// # Errors
    /// Returns [`StorageError::NotFound`] if the handle is unknown.
    async fn remove_account(&self, handle: &AccountHandle) -> Result<(), StorageError>;
}
