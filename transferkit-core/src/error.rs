use thiserror::Error;

use crate::crypto::AuthError;
use crate::payload::{AccountIdentity, DecodeError};
use crate::storage::StorageError;

/// Result type for transfer operations.
pub type TransferResult<T, E = TransferError> = std::result::Result<T, E>;

/// Stable classification of a [`TransferError`].
///
/// Status channels publish the kind rather than the full error so the UI can
/// key its messages on it without ever showing collaborator text to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum ErrorKind {
    /// Wrong passphrase or denied biometric prompt.
    AuthorizationFailed,
    /// The user cancelled the session.
    Cancelled,
    /// The transferred account already exists on this device.
    DuplicateAccount,
    /// The reassembled payload could not be decrypted into a valid payload.
    DecodeFailure,
    /// A scanned frame belongs to another transfer. Reported per frame through
    /// [`IgnoreReason::kind`](crate::IgnoreReason::kind), never as a session error.
    ForeignFrame,
    /// Two frames claimed the same index with different content.
    ConflictingFrame,
    /// The account store failed to persist or query accounts.
    StorageFailure,
    /// The session already left its initial state.
    AlreadyInProgress,
    /// The operation is not valid in the session's current state.
    InvalidState,
    /// The caller supplied an invalid argument.
    InvalidInput,
    /// A scanned string is not a transfer frame.
    MalformedFrame,
}

impl ErrorKind {
    /// Message shown to the user for this kind of failure.
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            Self::AuthorizationFailed => "The passphrase is incorrect or the biometric check was denied. Please try again.",
            Self::Cancelled => "The transfer was cancelled.",
            Self::DuplicateAccount => "This account is already set up on this device.",
            Self::DecodeFailure => "The transferred data could not be read. Please restart the transfer on both devices.",
            Self::ForeignFrame => "This code belongs to a different transfer. Keep scanning the codes on the other device.",
            Self::ConflictingFrame => "The scanned codes do not match each other. Please restart the transfer.",
            Self::StorageFailure => "The account could not be saved on this device.",
            Self::AlreadyInProgress => "A transfer is already in progress.",
            Self::InvalidState | Self::InvalidInput => "Something went wrong. Please restart the transfer.",
            Self::MalformedFrame => "This code could not be read. Keep scanning.",
        }
    }

    /// Whether the failure was requested by the user and should not be shown
    /// as an error.
    #[must_use]
    pub const fn is_user_cancellation(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether the kind only concerns a single scanned frame and leaves the
    /// session running.
    #[must_use]
    pub const fn is_per_frame(self) -> bool {
        matches!(self, Self::ForeignFrame | Self::MalformedFrame)
    }
}

/// Errors raised by the transfer sessions and their building blocks.
#[derive(Debug, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
#[cfg_attr(feature = "ffi", uniffi(flat_error))]
pub enum TransferError {
    /// The authorization primitive rejected the request.
    #[error("authorization_failed: {0}")]
    AuthorizationFailed(#[source] AuthError),
    /// The session was cancelled by the user.
    #[error("cancelled")]
    Cancelled,
    /// An account with the same identity already exists locally.
    #[error("duplicate_account: {0}")]
    DuplicateAccount(AccountIdentity),
    /// The reassembled payload is corrupted or uses an unsupported schema.
    #[error("decode_failure: {0}")]
    DecodeFailure(#[from] DecodeError),
    /// A second frame with the same index carried a different fragment.
    #[error("conflicting_frame: index {index}")]
    ConflictingFrame {
        /// Index that was claimed twice.
        index: u32,
    },
    /// The account store failed.
    #[error("storage_failure: {0}")]
    StorageFailure(#[source] StorageError),
    /// `authorize` was called on a session that already left its initial state.
    #[error("already_in_progress")]
    AlreadyInProgress,
    /// The operation is not valid in the current session state.
    #[error("invalid_state: {0}")]
    InvalidState(String),
    /// The presented input is not valid for the requested operation.
    #[error("invalid_input_{attribute}: {reason}")]
    InvalidInput {
        /// Name of the offending argument.
        attribute: String,
        /// Why it was rejected.
        reason: String,
    },
    /// The scanned string is not a well-formed transfer frame.
    #[error("malformed_frame: {0}")]
    MalformedFrame(String),
}

impl TransferError {
    /// Returns the stable kind of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthorizationFailed(_) => ErrorKind::AuthorizationFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DuplicateAccount(_) => ErrorKind::DuplicateAccount,
            Self::DecodeFailure(_) => ErrorKind::DecodeFailure,
            Self::ConflictingFrame { .. } => ErrorKind::ConflictingFrame,
            Self::StorageFailure(_) => ErrorKind::StorageFailure,
            Self::AlreadyInProgress => ErrorKind::AlreadyInProgress,
            Self::InvalidState(_) => ErrorKind::InvalidState,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::MalformedFrame(_) => ErrorKind::MalformedFrame,
        }
    }

    /// Message shown to the user, keyed on [`Self::kind`].
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        self.kind().user_message()
    }

    pub(crate) fn invalid_input(attribute: &str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<StorageError> for TransferError {
    fn from(error: StorageError) -> Self {
        Self::StorageFailure(error)
    }
}

/// Maps a failure of the authorization primitive while opening a payload.
///
/// Tampered or truncated ciphertext is a decoding problem, not a wrong passphrase.
impl From<AuthError> for TransferError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::MalformedCiphertext(reason) => {
                Self::DecodeFailure(DecodeError::Malformed(reason))
            }
            other => Self::AuthorizationFailed(other),
        }
    }
}
