//! Export session: authorizes the provisioned device and hands out frames.
//!
//! ```text
//! Uninitialized ─authorize─▶ Authorizing ─▶ Ready ─next_frame─▶ EmittingFrame(0..n) ─▶ Finished
//!        └──────────────┴──────────────────┴──────────────────────┴─▶ Failed(kind)
//! ```
//!
//! Frames are pulled by the renderer one at a time. The session holds one
//! authorization token from `authorize` until it finishes or is cancelled,
//! and releases it through the authorizer either way.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::crypto::{AuthMethod, AuthToken, Authorizer};
use crate::frame::Frame;
use crate::payload::{AccountCredentials, TransferPayload};
use crate::segmenter::segment;
use crate::{ErrorKind, TransferError, TransferResult, MAX_FRAGMENT_SIZE};

/// Observable state of an [`ExportSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum ExportStatus {
    /// Waiting for `authorize`.
    Uninitialized,
    /// The authorization primitive is running.
    Authorizing,
    /// Frames are built; none displayed yet.
    Ready {
        /// Number of frames in the transfer.
        total: u32,
    },
    /// `frame` is the one to display.
    EmittingFrame {
        /// Current frame.
        frame: Frame,
    },
    /// The user stepped through every frame.
    Finished,
    /// The session ended without finishing.
    Failed {
        /// Why. [`ErrorKind::Cancelled`] for user cancellation.
        kind: ErrorKind,
    },
}

impl ExportStatus {
    /// Whether no further transition can happen.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed { .. })
    }
}

enum ExportState {
    Uninitialized,
    Authorizing,
    Active {
        frames: Vec<Frame>,
        cursor: Option<usize>,
        token: AuthToken,
    },
    Finished,
    Failed(ErrorKind),
}

impl ExportState {
    const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Failed(_))
    }

    fn into_token(self) -> Option<AuthToken> {
        match self {
            Self::Active { token, .. } => Some(token),
            _ => None,
        }
    }

    fn inactive_error(&self) -> TransferError {
        match self {
            Self::Uninitialized | Self::Authorizing => {
                TransferError::InvalidState("export session is not authorized yet".to_string())
            }
            Self::Failed(ErrorKind::Cancelled) => TransferError::Cancelled,
            Self::Failed(kind) => TransferError::InvalidState(format!("export session failed: {kind}")),
            Self::Active { .. } | Self::Finished => {
                TransferError::InvalidState("export session is active".to_string())
            }
        }
    }
}

/// Drives one export from authorization to the last displayed frame.
pub struct ExportSession {
    credentials: AccountCredentials,
    authorizer: Arc<dyn Authorizer>,
    state: Mutex<ExportState>,
    status: watch::Sender<ExportStatus>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for ExportSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportSession")
            .field("status", &*self.status.borrow())
            .finish_non_exhaustive()
    }
}

impl ExportSession {
    /// Creates a session for `credentials` in [`ExportStatus::Uninitialized`].
    #[must_use]
    pub fn new(credentials: AccountCredentials, authorizer: Arc<dyn Authorizer>) -> Self {
        let (status, _) = watch::channel(ExportStatus::Uninitialized);
        Self {
            credentials,
            authorizer,
            state: Mutex::new(ExportState::Uninitialized),
            status,
            cancel: CancellationToken::new(),
        }
    }

    /// Authorizes the export, then builds, encrypts and segments the payload.
    ///
    /// `max_fragment_size` is the renderer's per-code byte capacity, capped at
    /// [`MAX_FRAGMENT_SIZE`] so every frame stays parseable. Returns the
    /// number of frames.
    ///
    /// # Errors
    /// - [`TransferError::AlreadyInProgress`] unless the session is uninitialized;
    ///   the session is left untouched.
    /// - [`TransferError::InvalidInput`] for a zero fragment size.
    /// - [`TransferError::AuthorizationFailed`] if the primitive rejects the method.
    /// - [`TransferError::Cancelled`] if [`cancel`](Self::cancel) wins the race.
    pub async fn authorize(&self, method: AuthMethod, max_fragment_size: usize) -> TransferResult<u32> {
        {
            let mut state = self.state();
            if !matches!(*state, ExportState::Uninitialized) {
                log::debug!("export: authorize rejected, session already started");
                return Err(TransferError::AlreadyInProgress);
            }
            if max_fragment_size == 0 {
                return Err(TransferError::invalid_input(
                    "max_fragment_size",
                    "must be at least 1",
                ));
            }
            *state = ExportState::Authorizing;
            self.status.send_replace(ExportStatus::Authorizing);
        }
        log::info!("export: authorizing with {}", method.label());

        let authorized = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            result = self.authorizer.authorize(method) => result,
        };
        let token = match authorized {
            Ok(token) => token,
            Err(err) => {
                log::warn!("export: authorization failed: {err}");
                self.fail(ErrorKind::AuthorizationFailed);
                return Err(TransferError::AuthorizationFailed(err));
            }
        };

        let built = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(TransferError::Cancelled),
            result = self.build_frames(&token, max_fragment_size.min(MAX_FRAGMENT_SIZE)) => result,
        };
        let frames = match built {
            Ok(frames) => frames,
            Err(err) => {
                self.authorizer.release(&token);
                if !matches!(err, TransferError::Cancelled) {
                    log::error!("export: building frames failed: {err}");
                    self.fail(err.kind());
                }
                return Err(err);
            }
        };

        let total = frames.first().map_or(1, |frame| frame.total);
        let mut state = self.state();
        if !matches!(*state, ExportState::Authorizing) {
            drop(state);
            self.authorizer.release(&token);
            return Err(TransferError::Cancelled);
        }
        *state = ExportState::Active {
            frames,
            cursor: None,
            token,
        };
        self.status.send_replace(ExportStatus::Ready { total });
        drop(state);

        log::info!("export: payload split into {total} frames");
        Ok(total)
    }

    /// Advances to the next frame and returns it.
    ///
    /// Returns `None` once the last frame has been passed, which moves the
    /// session to [`ExportStatus::Finished`] and releases the authorization.
    ///
    /// # Errors
    /// Returns [`TransferError::InvalidState`] before authorization or after a
    /// failure, and [`TransferError::Cancelled`] after cancellation.
    pub fn next_frame(&self) -> TransferResult<Option<Frame>> {
        let mut state = self.state();
        match &mut *state {
            ExportState::Active { frames, cursor, .. } => {
                let next = cursor.map_or(0, |current| current + 1);
                if let Some(frame) = frames.get(next).cloned() {
                    *cursor = Some(next);
                    log::trace!("export: emitting frame {}/{}", frame.index + 1, frame.total);
                    self.status.send_replace(ExportStatus::EmittingFrame {
                        frame: frame.clone(),
                    });
                    return Ok(Some(frame));
                }
            }
            ExportState::Finished => return Ok(None),
            other => return Err(other.inactive_error()),
        }

        let token = std::mem::replace(&mut *state, ExportState::Finished).into_token();
        self.status.send_replace(ExportStatus::Finished);
        drop(state);

        if let Some(token) = token {
            self.authorizer.release(&token);
        }
        log::info!("export: all frames displayed");
        Ok(None)
    }

    /// Steps back one frame, for a user who wants to re-show the previous code.
    ///
    /// Stays on frame 0 if already there; returns `None` before the first frame.
    ///
    /// # Errors
    /// Same as [`next_frame`](Self::next_frame).
    pub fn previous_frame(&self) -> TransferResult<Option<Frame>> {
        let mut state = self.state();
        match &mut *state {
            ExportState::Active { frames, cursor, .. } => {
                let Some(current) = *cursor else {
                    return Ok(None);
                };
                let previous = current.saturating_sub(1);
                *cursor = Some(previous);
                let frame = frames[previous].clone();
                self.status.send_replace(ExportStatus::EmittingFrame {
                    frame: frame.clone(),
                });
                Ok(Some(frame))
            }
            ExportState::Finished => Ok(None),
            other => Err(other.inactive_error()),
        }
    }

    /// The frame currently displayed, if any.
    #[must_use]
    pub fn current_frame(&self) -> Option<Frame> {
        match &*self.state() {
            ExportState::Active {
                frames,
                cursor: Some(cursor),
                ..
            } => frames.get(*cursor).cloned(),
            _ => None,
        }
    }

    /// Frame `index` without moving the cursor.
    #[must_use]
    pub fn frame_at(&self, index: u32) -> Option<Frame> {
        match &*self.state() {
            ExportState::Active { frames, .. } => frames.get(index as usize).cloned(),
            _ => None,
        }
    }

    /// Number of frames, once authorized.
    #[must_use]
    pub fn total_frames(&self) -> Option<u32> {
        match &*self.state() {
            ExportState::Active { frames, .. } => frames.first().map(|frame| frame.total),
            _ => None,
        }
    }

    /// Current status. Never blocks on a running operation.
    #[must_use]
    pub fn status(&self) -> ExportStatus {
        self.status.borrow().clone()
    }

    /// Stream of status updates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ExportStatus> {
        self.status.subscribe()
    }

    /// Cancels the session.
    ///
    /// A running `authorize` resolves as [`TransferError::Cancelled`] and any
    /// held authorization is released. No-op once the session has ended.
    pub fn cancel(&self) {
        let previous = {
            let mut state = self.state();
            if state.is_terminal() {
                return;
            }
            let previous = std::mem::replace(&mut *state, ExportState::Failed(ErrorKind::Cancelled));
            self.status.send_replace(ExportStatus::Failed {
                kind: ErrorKind::Cancelled,
            });
            previous
        };
        self.cancel.cancel();

        if let Some(token) = previous.into_token() {
            self.authorizer.release(&token);
        }
        log::info!("export: cancelled");
    }

    async fn build_frames(&self, token: &AuthToken, max_fragment_size: usize) -> TransferResult<Vec<Frame>> {
        let payload = TransferPayload::from_credentials(&self.credentials);
        let plaintext = payload.encode()?;
        let ciphertext = self
            .authorizer
            .encrypt_with_token(&plaintext, token)
            .await
            .map_err(TransferError::AuthorizationFailed)?;
        segment(&ciphertext, max_fragment_size)
    }

    fn fail(&self, kind: ErrorKind) {
        let previous = {
            let mut state = self.state();
            if state.is_terminal() {
                return;
            }
            let previous = std::mem::replace(&mut *state, ExportState::Failed(kind));
            self.status.send_replace(ExportStatus::Failed { kind });
            previous
        };
        if let Some(token) = previous.into_token() {
            self.authorizer.release(&token);
        }
    }

    fn state(&self) -> MutexGuard<'_, ExportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        if let Ok(ExportState::Active { token, .. }) = self.state.get_mut() {
            self.authorizer.release(token);
        }
    }
}
