//! In-memory [`AccountStorage`], for tests and host applications without persistence.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use super::{AccountHandle, AccountStorage, StorageError};
use crate::crypto::AuthMethod;
use crate::payload::{AccountIdentity, PayloadSummary, TransferPayload};

/// A stored account as seen by tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAccount {
    /// Handle returned by the commit.
    pub handle: AccountHandle,
    /// Non-secret payload fields.
    pub summary: PayloadSummary,
    /// Label of the local authorization method the key was bound to.
    pub local_method: &'static str,
}

/// Accounts kept in a process-local map.
#[derive(Debug, Default)]
pub struct MemoryAccountStorage {
    accounts: Mutex<HashMap<AccountIdentity, StoredAccount>>,
}

impl MemoryAccountStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a placeholder account, as if it had been set up earlier.
    ///
    /// # Errors
    /// Returns an error if the store mutex is poisoned.
    pub fn insert_existing(&self, summary: PayloadSummary) -> Result<AccountHandle, StorageError> {
        let handle = AccountHandle {
            id: Uuid::new_v4().to_string(),
            identity: summary.identity.clone(),
        };
        self.lock()?.insert(
            summary.identity.clone(),
            StoredAccount {
                handle: handle.clone(),
                summary,
                local_method: "preexisting",
            },
        );
        Ok(handle)
    }

    /// Returns the stored account for `identity`, if any.
    #[must_use]
    pub fn get(&self, identity: &AccountIdentity) -> Option<StoredAccount> {
        self.lock().ok()?.get(identity).cloned()
    }

    /// Number of stored accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().map_or(0, |accounts| accounts.len())
    }

    /// Whether no account is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<AccountIdentity, StoredAccount>>, StorageError>
    {
        self.accounts
            .lock()
            .map_err(|_| StorageError::Backend("mutex poisoned".to_string()))
    }
}

#[async_trait]
impl AccountStorage for MemoryAccountStorage {
    async fn account_exists(&self, identity: &AccountIdentity) -> Result<bool, StorageError> {
        Ok(self.lock()?.contains_key(identity))
    }

    async fn commit_account(
        &self,
        payload: TransferPayload,
        local: AuthMethod,
    ) -> Result<AccountHandle, StorageError> {
        let mut accounts = self.lock()?;
        if accounts.contains_key(payload.identity()) {
            return Err(StorageError::AlreadyExists(payload.identity().clone()));
        }
        let handle = AccountHandle {
            id: Uuid::new_v4().to_string(),
            identity: payload.identity().clone(),
        };
        accounts.insert(
            payload.identity().clone(),
            StoredAccount {
                handle: handle.clone(),
                summary: payload.summary(),
                local_method: local.label(),
            },
        );
        Ok(handle)
    }

    async fn remove_account(&self, handle: &AccountHandle) -> Result<(), StorageError> {
        let mut accounts = self.lock()?;
        match accounts.get(&handle.identity) {
            Some(stored) if stored.handle.id == handle.id => {
                accounts.remove(&handle.identity);
                Ok(())
            }
            _ => Err(StorageError::NotFound(handle.id.clone())),
        }
    }
}
