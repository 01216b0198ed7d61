//! Import session: ingests scanned frames and commits the account once.
//!
//! ```text
//! Configuring ─first frame─▶ Scanning ─last frame─▶ ScanningFinished ─complete_transfer─▶ Completed
//!      └──────────────────────────┴──────────────────────────┴─▶ Failed(kind)
//! ```
//!
//! Scanned strings are pushed through [`ImportSession::process_payload`]. A call
//! arriving while another one is still running is dropped, not queued: the
//! scanner will present the same code again on its next pass.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::config::TransferConfig;
use crate::crypto::{AuthMethod, AuthToken, Authorizer};
use crate::frame::Frame;
use crate::payload::{PayloadSummary, TransferPayload};
use crate::reassembler::{Reassembler, ReassemblyOutcome, RejectReason};
use crate::storage::{AccountHandle, AccountStorage, StorageError};
use crate::{ErrorKind, TransferError, TransferResult};

/// Observable progress of an [`ImportSession`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum ImportProgress {
    /// No frame accepted yet.
    Configuring,
    /// Frames are arriving.
    Scanning {
        /// Distinct frames received.
        received: u32,
        /// Frames in the transfer.
        total: u32,
        /// `received / total`, in `[0, 1]`.
        fraction: f64,
    },
    /// Payload decoded; waiting for the user to confirm.
    ScanningFinished,
    /// The account was committed.
    Completed,
    /// The session ended without committing.
    Failed {
        /// Why. [`ErrorKind::Cancelled`] for user cancellation.
        kind: ErrorKind,
    },
}

impl ImportProgress {
    fn scanning(received: u32, total: u32) -> Self {
        Self::Scanning {
            received,
            total,
            fraction: f64::from(received) / f64::from(total.max(1)),
        }
    }

    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }
}

/// Why a scanned string did not advance the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum IgnoreReason {
    /// Not a transfer frame, or damaged.
    Malformed,
    /// A frame from another transfer.
    ForeignTransfer,
    /// The transfer announces more frames than this device accepts.
    TooManyFrames,
    /// Every frame is already in; nothing left to scan.
    SessionComplete,
}

impl IgnoreReason {
    /// Per-frame error kind for the ignored code, if it was not simply late.
    #[must_use]
    pub const fn kind(self) -> Option<ErrorKind> {
        match self {
            Self::Malformed => Some(ErrorKind::MalformedFrame),
            Self::ForeignTransfer | Self::TooManyFrames => Some(ErrorKind::ForeignFrame),
            Self::SessionComplete => None,
        }
    }
}

/// Result of one [`ImportSession::process_payload`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum ScanOutcome {
    /// Frame merged; more are needed.
    Progress {
        /// Distinct frames received.
        received: u32,
        /// Frames in the transfer.
        total: u32,
    },
    /// Last frame merged and the payload decoded. Confirm with
    /// [`ImportSession::complete_transfer`].
    Finished,
    /// The string was skipped; the session is unaffected.
    Ignored {
        /// Why.
        reason: IgnoreReason,
    },
    /// Another call was in flight.
    Dropped,
}

enum ImportState {
    Scanning(Reassembler),
    Decoding,
    Finished(Box<TransferPayload>),
    Committing,
    Completed,
    Failed(ErrorKind),
}

impl ImportState {
    fn closed_for_scanning(&self) -> TransferResult<ScanOutcome> {
        match self {
            Self::Decoding | Self::Finished(_) | Self::Committing | Self::Completed => {
                Ok(ScanOutcome::Ignored {
                    reason: IgnoreReason::SessionComplete,
                })
            }
            Self::Failed(ErrorKind::Cancelled) => Err(TransferError::Cancelled),
            Self::Failed(kind) => Err(TransferError::InvalidState(format!(
                "import session failed: {kind}"
            ))),
            Self::Scanning(_) => Err(TransferError::InvalidState(
                "import session is scanning".to_string(),
            )),
        }
    }

    fn not_committable(&self) -> TransferError {
        match self {
            Self::Committing => TransferError::AlreadyInProgress,
            Self::Completed => {
                TransferError::InvalidState("account already committed".to_string())
            }
            Self::Failed(ErrorKind::Cancelled) => TransferError::Cancelled,
            Self::Failed(kind) => TransferError::InvalidState(format!("import session failed: {kind}")),
            Self::Scanning(_) | Self::Decoding | Self::Finished(_) => {
                TransferError::InvalidState("payload not received yet".to_string())
            }
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives one import from the first scanned code to the committed account.
pub struct ImportSession {
    authorizer: Arc<dyn Authorizer>,
    storage: Arc<dyn AccountStorage>,
    token: AuthToken,
    state: Mutex<ImportState>,
    in_flight: AtomicBool,
    progress: watch::Sender<ImportProgress>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ImportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportSession")
            .field("progress", &*self.progress.borrow())
            .finish_non_exhaustive()
    }
}

impl ImportSession {
    /// Creates a session in [`ImportProgress::Configuring`].
    ///
    /// `token` comes from `authorizer` and opens the transferred payload; the
    /// session releases it when it ends.
    #[must_use]
    pub fn new(
        config: &TransferConfig,
        authorizer: Arc<dyn Authorizer>,
        storage: Arc<dyn AccountStorage>,
        token: AuthToken,
    ) -> Self {
        let (progress, _) = watch::channel(ImportProgress::Configuring);
        Self {
            authorizer,
            storage,
            token,
            state: Mutex::new(ImportState::Scanning(Reassembler::with_limit(
                config.max_total_frames,
            ))),
            in_flight: AtomicBool::new(false),
            progress,
            cancel: CancellationToken::new(),
        }
    }

    /// Feeds one scanned string.
    ///
    /// Unreadable codes and frames of another transfer are ignored. When the
    /// last frame arrives the payload is decrypted, decoded and checked
    /// against the local accounts before [`ScanOutcome::Finished`] is returned.
    ///
    /// # Errors
    /// Each of these ends the session:
    /// - [`TransferError::ConflictingFrame`] if two codes disagree on one index.
    /// - [`TransferError::AuthorizationFailed`] if the token does not open the payload.
    /// - [`TransferError::DecodeFailure`] for a corrupted or unsupported payload.
    /// - [`TransferError::DuplicateAccount`] if the account already exists here.
    /// - [`TransferError::StorageFailure`] if the lookup fails.
    /// - [`TransferError::Cancelled`] if the session was cancelled.
    pub async fn process_payload(&self, raw: &str) -> TransferResult<ScanOutcome> {
        let Some(_guard) = InFlight::acquire(&self.in_flight) else {
            log::trace!("import: dropping code, previous one still in flight");
            return Ok(ScanOutcome::Dropped);
        };

        let ciphertext = {
            let mut state = self.state();
            let reassembler = match &mut *state {
                ImportState::Scanning(reassembler) => reassembler,
                other => return other.closed_for_scanning(),
            };

            let frame = match Frame::parse(raw) {
                Ok(frame) => frame,
                Err(err) => {
                    log::debug!("import: ignoring unreadable code: {err}");
                    return Ok(ScanOutcome::Ignored {
                        reason: IgnoreReason::Malformed,
                    });
                }
            };

            match reassembler.accept(frame) {
                ReassemblyOutcome::Progress { received, total } => {
                    log::trace!("import: {received}/{total} frames");
                    self.progress
                        .send_replace(ImportProgress::scanning(received, total));
                    return Ok(ScanOutcome::Progress { received, total });
                }
                ReassemblyOutcome::Rejected(reason) => {
                    return self.rejected(&mut state, reason);
                }
                ReassemblyOutcome::Complete(ciphertext) => {
                    let total = reassembler.total().unwrap_or(1);
                    *state = ImportState::Decoding;
                    self.progress
                        .send_replace(ImportProgress::scanning(total, total));
                    ciphertext
                }
            }
        };
        log::info!("import: all frames received, opening payload");

        let opened = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(TransferError::Cancelled),
            result = self.open(&ciphertext) => result,
        };

        match opened {
            Ok(payload) => {
                let mut state = self.state();
                if !matches!(*state, ImportState::Decoding) {
                    return Err(TransferError::Cancelled);
                }
                log::debug!("import: payload decoded for {}", payload.identity());
                *state = ImportState::Finished(Box::new(payload));
                self.progress.send_replace(ImportProgress::ScanningFinished);
                Ok(ScanOutcome::Finished)
            }
            Err(TransferError::Cancelled) => Err(TransferError::Cancelled),
            Err(err) => {
                log::warn!("import: payload rejected: {err}");
                self.fail(err.kind());
                Err(err)
            }
        }
    }

    /// Commits the decoded account, re-wrapping its key under `local`.
    ///
    /// This is the only place an account is persisted. If the session is
    /// cancelled while the commit runs, any account it produced is removed
    /// again and [`TransferError::Cancelled`] is returned.
    ///
    /// # Errors
    /// - [`TransferError::InvalidState`] before [`ScanOutcome::Finished`] or after completion.
    /// - [`TransferError::AlreadyInProgress`] while another commit runs.
    /// - [`TransferError::DuplicateAccount`] if the account appeared meanwhile.
    /// - [`TransferError::StorageFailure`] if persisting fails.
    /// - [`TransferError::Cancelled`] if the session was cancelled.
    pub async fn complete_transfer(&self, local: AuthMethod) -> TransferResult<AccountHandle> {
        let payload = {
            let mut state = self.state();
            match std::mem::replace(&mut *state, ImportState::Committing) {
                ImportState::Finished(payload) => payload,
                other => {
                    let err = other.not_committable();
                    *state = other;
                    return Err(err);
                }
            }
        };
        log::info!("import: committing account, local method {}", local.label());

        let committed = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(TransferError::Cancelled),
            result = self.storage.commit_account(*payload, local) => result.map_err(|err| match err {
                StorageError::AlreadyExists(identity) => TransferError::DuplicateAccount(identity),
                other => TransferError::StorageFailure(other),
            }),
        };

        match committed {
            Ok(handle) => {
                let in_time = {
                    let mut state = self.state();
                    if matches!(*state, ImportState::Committing) {
                        *state = ImportState::Completed;
                        self.progress.send_replace(ImportProgress::Completed);
                        true
                    } else {
                        false
                    }
                };
                if in_time {
                    self.authorizer.release(&self.token);
                    log::info!("import: account {} committed", handle.identity);
                    return Ok(handle);
                }

                log::info!("import: cancelled during commit, rolling back");
                if let Err(err) = self.storage.remove_account(&handle).await {
                    log::error!("import: rollback of {} failed: {err}", handle.id);
                }
                Err(TransferError::Cancelled)
            }
            Err(TransferError::Cancelled) => Err(TransferError::Cancelled),
            Err(err) => {
                log::error!("import: commit failed: {err}");
                self.fail(err.kind());
                Err(err)
            }
        }
    }

    /// Cancels the session and discards everything received.
    ///
    /// Running calls resolve as [`TransferError::Cancelled`]. No-op once the
    /// account is committed or the session has failed.
    pub fn cancel_transfer(&self) {
        {
            let mut state = self.state();
            if matches!(*state, ImportState::Completed | ImportState::Failed(_)) {
                return;
            }
            *state = ImportState::Failed(ErrorKind::Cancelled);
            self.progress.send_replace(ImportProgress::Failed {
                kind: ErrorKind::Cancelled,
            });
        }
        self.cancel.cancel();
        self.authorizer.release(&self.token);
        log::info!("import: cancelled");
    }

    /// Non-secret view of the decoded payload, for the confirmation screen.
    #[must_use]
    pub fn payload_summary(&self) -> Option<PayloadSummary> {
        match &*self.state() {
            ImportState::Finished(payload) => Some(payload.summary()),
            _ => None,
        }
    }

    /// Indices still missing. Empty before the first frame and after the last.
    #[must_use]
    pub fn missing_frames(&self) -> Vec<u32> {
        match &*self.state() {
            ImportState::Scanning(reassembler) => reassembler.missing(),
            _ => Vec::new(),
        }
    }

    /// Current progress. Never blocks on a running operation.
    #[must_use]
    pub fn progress(&self) -> ImportProgress {
        self.progress.borrow().clone()
    }

    /// Stream of progress updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ImportProgress> {
        self.progress.subscribe()
    }

    fn rejected(
        &self,
        state: &mut ImportState,
        reason: RejectReason,
    ) -> TransferResult<ScanOutcome> {
        let reason = match reason {
            RejectReason::Conflict { index } => {
                log::warn!("import: conflicting fragment for frame {index}");
                *state = ImportState::Failed(ErrorKind::ConflictingFrame);
                self.progress.send_replace(ImportProgress::Failed {
                    kind: ErrorKind::ConflictingFrame,
                });
                self.authorizer.release(&self.token);
                return Err(TransferError::ConflictingFrame { index });
            }
            RejectReason::ForeignTransfer { expected, found } => {
                log::debug!("import: ignoring frame of a {found}-frame transfer, expected {expected}");
                IgnoreReason::ForeignTransfer
            }
            RejectReason::TooManyFrames { total, limit } => {
                log::warn!("import: ignoring {total}-frame transfer, limit is {limit}");
                IgnoreReason::TooManyFrames
            }
            RejectReason::IndexOutOfRange { .. } => IgnoreReason::Malformed,
            RejectReason::AlreadyComplete => IgnoreReason::SessionComplete,
        };
        Ok(ScanOutcome::Ignored { reason })
    }

    async fn open(&self, ciphertext: &[u8]) -> TransferResult<TransferPayload> {
        let plaintext = self
            .authorizer
            .decrypt_with_token(ciphertext, &self.token)
            .await?;
        let payload = TransferPayload::decode(&plaintext)?;
        if self.storage.account_exists(payload.identity()).await? {
            return Err(TransferError::DuplicateAccount(payload.identity().clone()));
        }
        Ok(payload)
    }

    fn fail(&self, kind: ErrorKind) {
        {
            let mut state = self.state();
            if matches!(*state, ImportState::Completed | ImportState::Failed(_)) {
                return;
            }
            *state = ImportState::Failed(kind);
            self.progress.send_replace(ImportProgress::Failed { kind });
        }
        self.authorizer.release(&self.token);
    }

    fn state(&self) -> MutexGuard<'_, ImportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ImportSession {
    fn drop(&mut self) {
        self.authorizer.release(&self.token);
    }
}
