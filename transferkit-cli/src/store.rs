//! JSON-file account store used by `transferkit import`.
//!
//! All accounts live in `<dir>/accounts.json`. Every change rewrites the file
//! through a temporary sibling and a rename, so a reader never sees a partial
//! write and an interrupted commit leaves the previous file in place. Private
//! keys are sealed under the local passphrase before they touch the disk.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use transferkit_core::{
    AccountHandle, AccountIdentity, AccountProfile, AccountStorage, AuthMethod, Authorizer,
    PassphraseAuthorizer, StorageError, TransferConfig, TransferPayload,
};
use uuid::Uuid;

const STORE_FILE: &str = "accounts.json";
const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub identity: AccountIdentity,
    pub profile: AccountProfile,
    pub fingerprint: String,
    pub local_method: String,
    sealed_key: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    accounts: Vec<StoredRecord>,
}

impl Default for StoreFile {
    fn default() -> Self {
        Self {
            version: STORE_VERSION,
            accounts: Vec::new(),
        }
    }
}

pub struct FileAccountStore {
    files: Arc<StoreFiles>,
    sealer: PassphraseAuthorizer,
}

/// Blocking side of the store. Only ever called from `spawn_blocking`.
struct StoreFiles {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileAccountStore {
    /// Opens (and creates if needed) the store directory.
    pub async fn open(
        dir: impl Into<PathBuf>,
        config: &TransferConfig,
    ) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| io_error(&dir, "creating", source))?;
        let sealer = PassphraseAuthorizer::new(config)
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(Self {
            files: Arc::new(StoreFiles {
                dir,
                write_lock: Mutex::new(()),
            }),
            sealer,
        })
    }

    pub fn path(&self) -> PathBuf {
        self.files.path()
    }

    /// Every stored account.
    pub async fn accounts(&self) -> Result<Vec<StoredRecord>, StorageError> {
        self.blocking(|files| Ok(files.read()?.accounts)).await
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        F: FnOnce(&StoreFiles) -> Result<T, StorageError> + Send + 'static,
        T: Send + 'static,
    {
        let files = Arc::clone(&self.files);
        tokio::task::spawn_blocking(move || op(&files))
            .await
            .map_err(|err| StorageError::Backend(format!("store task: {err}")))?
    }

    fn start_insert(&self, record: StoredRecord) -> PendingInsert {
        let id = record.id.clone();
        let files = Arc::clone(&self.files);
        PendingInsert {
            files: Arc::clone(&self.files),
            id,
            task: Some(tokio::task::spawn_blocking(move || files.insert(record))),
        }
    }

    async fn seal(&self, plaintext: &[u8], local: AuthMethod) -> Result<String, StorageError> {
        let token = self
            .sealer
            .authorize(local)
            .await
            .map_err(|err| StorageError::Backend(format!("local authorization: {err}")))?;
        let sealed = self.sealer.encrypt_with_token(plaintext, &token).await;
        self.sealer.release(&token);
        let sealed = sealed.map_err(|err| StorageError::Backend(format!("sealing key: {err}")))?;
        Ok(STANDARD.encode(sealed))
    }
}

impl StoreFiles {
    fn path(&self) -> PathBuf {
        self.dir.join(STORE_FILE)
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read(&self) -> Result<StoreFile, StorageError> {
        let path = self.path();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreFile::default());
            }
            Err(source) => return Err(io_error(&path, "reading", source)),
        };
        let file: StoreFile = serde_json::from_slice(&bytes)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        if file.version != STORE_VERSION {
            return Err(StorageError::Serialization(format!(
                "unsupported store version {}",
                file.version
            )));
        }
        Ok(file)
    }

    fn write(&self, file: &StoreFile) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec_pretty(file)
            .map_err(|err| StorageError::Serialization(err.to_string()))?;
        let target = self.path();
        let temp = self.dir.join(format!(".{STORE_FILE}.{}.tmp", Uuid::new_v4()));

        std::fs::write(&temp, bytes).map_err(|source| io_error(&temp, "writing", source))?;
        std::fs::rename(&temp, &target).map_err(|source| {
            let _ = std::fs::remove_file(&temp);
            io_error(&target, "replacing", source)
        })
    }

    fn insert(&self, record: StoredRecord) -> Result<(), StorageError> {
        let _guard = self.lock();
        let mut file = self.read()?;
        if file
            .accounts
            .iter()
            .any(|existing| existing.identity == record.identity)
        {
            return Err(StorageError::AlreadyExists(record.identity));
        }
        file.accounts.push(record);
        self.write(&file)
    }

    fn remove(&self, id: &str) -> Result<(), StorageError> {
        let _guard = self.lock();
        let mut file = self.read()?;
        let before = file.accounts.len();
        file.accounts.retain(|record| record.id != id);
        if file.accounts.len() == before {
            return Err(StorageError::NotFound(id.to_string()));
        }
        self.write(&file)
    }
}

/// An insert running on the blocking pool.
///
/// The blocking task cannot be stopped once spawned. If the awaiting future
/// is dropped first, the insert is undone as soon as it lands, so an abandoned
/// commit never leaves an account behind.
struct PendingInsert {
    files: Arc<StoreFiles>,
    id: String,
    task: Option<JoinHandle<Result<(), StorageError>>>,
}

impl PendingInsert {
    async fn finish(mut self) -> Result<(), StorageError> {
        let Some(task) = self.task.as_mut() else {
            return Ok(());
        };
        let result = task.await;
        self.task = None;
        result.map_err(|err| StorageError::Backend(format!("store task: {err}")))?
    }
}

impl Drop for PendingInsert {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let files = Arc::clone(&self.files);
        let id = std::mem::take(&mut self.id);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(%id, "abandoned commit outside a runtime, cannot roll back");
            return;
        };
        runtime.spawn(async move {
            if !matches!(task.await, Ok(Ok(()))) {
                return;
            }
            tracing::info!(%id, "rolling back abandoned commit");
            let removed = tokio::task::spawn_blocking(move || files.remove(&id)).await;
            if !matches!(removed, Ok(Ok(()))) {
                tracing::error!(?removed, "rollback of abandoned commit failed");
            }
        });
    }
}

fn io_error(path: &Path, action: &str, source: std::io::Error) -> StorageError {
    StorageError::Io {
        context: format!("{action} {}", path.display()),
        source,
    }
}

#[async_trait]
impl AccountStorage for FileAccountStore {
    async fn account_exists(&self, identity: &AccountIdentity) -> Result<bool, StorageError> {
        let identity = identity.clone();
        self.blocking(move |files| {
            Ok(files
                .read()?
                .accounts
                .iter()
                .any(|record| record.identity == identity))
        })
        .await
    }

    async fn commit_account(
        &self,
        payload: TransferPayload,
        local: AuthMethod,
    ) -> Result<AccountHandle, StorageError> {
        let local_method = local.label().to_string();
        let sealed_key = self
            .seal(payload.private_key().expose_secret().as_bytes(), local)
            .await?;

        let handle = AccountHandle {
            id: Uuid::new_v4().to_string(),
            identity: payload.identity().clone(),
        };
        self.start_insert(StoredRecord {
            id: handle.id.clone(),
            identity: handle.identity.clone(),
            profile: payload.profile().clone(),
            fingerprint: payload.fingerprint().to_string(),
            local_method,
            sealed_key,
        })
        .finish()
        .await?;
        tracing::debug!(account = %handle.identity, "account written to store");
        Ok(handle)
    }

    async fn remove_account(&self, handle: &AccountHandle) -> Result<(), StorageError> {
        let id = handle.id.clone();
        self.blocking(move |files| files.remove(&id)).await
    }
}
