//! Device-to-device account transfer over a sequence of scannable codes.
//!
//! The provisioned device runs an [`ExportSession`]: the user authorizes,
//! the account is serialized, encrypted and split into [`Frame`]s that the
//! host renders one after another. The new device runs an [`ImportSession`]:
//! scanned strings are pushed in any order, the payload is reassembled,
//! decrypted and checked against local accounts, and a single confirmed
//! commit persists it.
//!
//! Platform capabilities are injected as trait objects: an [`Authorizer`]
//! (passphrase or biometric check, payload wrapping) and an
//! [`AccountStorage`]. [`PassphraseAuthorizer`] and [`MemoryAccountStorage`]
//! are portable implementations.
#![deny(clippy::all, clippy::pedantic, clippy::nursery)]

mod config;
pub use config::*;

mod error;
pub use error::*;

pub mod crypto;
pub use crypto::{AuthError, AuthMethod, AuthToken, Authorizer, PassphraseAuthorizer};

pub mod frame;
pub use frame::Frame;

pub mod payload;
pub use payload::{
    AccountCredentials, AccountIdentity, AccountProfile, DecodeError, PayloadSummary,
    TransferPayload,
};

pub mod reassembler;
pub mod segmenter;

pub mod storage;
pub use storage::{AccountHandle, AccountStorage, MemoryAccountStorage, StorageError};

mod export;
pub use export::{ExportSession, ExportStatus};

mod import;
pub use import::{IgnoreReason, ImportProgress, ImportSession, ScanOutcome};

pub mod logger;

#[cfg(feature = "ffi")]
uniffi::setup_scaffolding!("transferkit_core");
