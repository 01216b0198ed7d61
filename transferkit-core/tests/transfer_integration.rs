mod common;

use std::sync::Arc;

use common::{GatePoint, GatedAuthorizer, GatedStorage, CancellingStorage, PASSPHRASE};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use transferkit_core::reassembler::{Reassembler, ReassemblyOutcome};
use transferkit_core::segmenter::segment;
use transferkit_core::{
    AccountStorage, AuthMethod, ErrorKind, ExportSession, ExportStatus, Frame, IgnoreReason,
    ImportProgress, MemoryAccountStorage, PassphraseAuthorizer, ScanOutcome, TransferError, TransferPayload,
};

fn import_authorizer() -> Arc<PassphraseAuthorizer> {
    Arc::new(PassphraseAuthorizer::new(&common::fast_config()).expect("authorizer"))
}

#[test]
fn test_fifty_bytes_in_three_frames_out_of_order() {
    let bytes: Vec<u8> = (0..50u8).collect();
    let codes: Vec<String> = segment(&bytes, 20)
        .expect("segment")
        .iter()
        .map(Frame::to_code_string)
        .collect();
    assert_eq!(codes.len(), 3);

    let mut reassembler = Reassembler::new();
    let frame = |index: usize| Frame::parse(&codes[index]).expect("parse");

    assert_eq!(
        reassembler.accept(frame(1)),
        ReassemblyOutcome::Progress {
            received: 1,
            total: 3
        }
    );
    assert_eq!(
        reassembler.accept(frame(0)),
        ReassemblyOutcome::Progress {
            received: 2,
            total: 3
        }
    );
    assert_eq!(reassembler.accept(frame(2)), ReassemblyOutcome::Complete(bytes));
}

#[tokio::test]
async fn test_fifty_bytes_in_three_frames_through_import_session() {
    let bytes: Vec<u8> = (0..50u8).collect();
    let codes: Vec<String> = segment(&bytes, 20)
        .expect("segment")
        .iter()
        .map(Frame::to_code_string)
        .collect();
    assert_eq!(codes.len(), 3);

    let plaintext = TransferPayload::from_credentials(&common::credentials("ada"))
        .encode()
        .expect("encode")
        .to_vec();
    let authorizer = Arc::new(common::RecordingAuthorizer::new(plaintext));
    let storage = Arc::new(MemoryAccountStorage::new());
    let session = common::import_session(authorizer.clone(), storage, PASSPHRASE).await;

    assert_eq!(
        session.process_payload(&codes[1]).await.expect("scan"),
        ScanOutcome::Progress {
            received: 1,
            total: 3
        }
    );
    assert_eq!(
        session.process_payload(&codes[0]).await.expect("scan"),
        ScanOutcome::Progress {
            received: 2,
            total: 3
        }
    );
    assert_eq!(
        session.process_payload(&codes[2]).await.expect("scan"),
        ScanOutcome::Finished
    );
    assert_eq!(
        authorizer.opened.lock().expect("opened lock").as_deref(),
        Some(bytes.as_slice())
    );
    assert_eq!(session.progress(), ImportProgress::ScanningFinished);
}

#[tokio::test]
async fn test_biometric_export_imports_with_passphrase() {
    let session = ExportSession::new(
        common::credentials("ada"),
        Arc::new(common::biometric_export_authorizer().await),
    );
    session
        .authorize(AuthMethod::Biometric, 4096)
        .await
        .expect("biometric authorize");
    let frame = session.next_frame().expect("next frame").expect("frame");
    assert!(frame.is_last());

    let storage = Arc::new(MemoryAccountStorage::new());
    let import = common::import_session(import_authorizer(), storage, PASSPHRASE).await;
    assert_eq!(
        import
            .process_payload(&frame.to_code_string())
            .await
            .expect("scan"),
        ScanOutcome::Finished
    );
    assert_eq!(
        import.payload_summary().expect("summary").identity,
        common::credentials("ada").identity
    );
}

#[tokio::test]
async fn test_end_to_end_shuffled_transfer() {
    let mut codes = common::export_codes(common::credentials("ada"), 32).await;
    assert!(codes.len() > 3);
    codes.shuffle(&mut StdRng::seed_from_u64(7));

    let storage = Arc::new(MemoryAccountStorage::new());
    let session = common::import_session(import_authorizer(), storage.clone(), PASSPHRASE).await;
    let mut updates = session.subscribe();

    let mut last_received = 0;
    for code in &codes[..codes.len() - 1] {
        match session.process_payload(code).await.expect("scan") {
            ScanOutcome::Progress { received, total } => {
                assert_eq!(received, last_received + 1);
                assert_eq!(total as usize, codes.len());
                last_received = received;
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }
    let ImportProgress::Scanning { fraction, .. } = *updates.borrow_and_update() else {
        panic!("expected scanning progress");
    };
    assert!(fraction > 0.0 && fraction < 1.0);

    assert_eq!(
        session
            .process_payload(codes.last().expect("codes"))
            .await
            .expect("scan"),
        ScanOutcome::Finished
    );
    let summary = session.payload_summary().expect("summary");
    assert_eq!(summary.identity, common::credentials("ada").identity);
    assert_eq!(summary.fingerprint, "0F1E2D3C4B5A69788796A5B4C3D2E1F0");

    let handle = session
        .complete_transfer(AuthMethod::passphrase("new-device-passphrase"))
        .await
        .expect("commit");
    let stored = storage.get(&handle.identity).expect("stored account");
    assert_eq!(stored.handle, handle);
    assert_eq!(stored.local_method, "passphrase");
    assert_eq!(*updates.borrow_and_update(), ImportProgress::Completed);
}

#[tokio::test]
async fn test_duplicate_account_is_refused() {
    let codes = common::export_codes(common::credentials("ada"), 4096).await;
    let storage = Arc::new(MemoryAccountStorage::new());
    let existing = transferkit_core::PayloadSummary {
        identity: common::credentials("ada").identity,
        profile: common::credentials("ada").profile,
        fingerprint: "OLD".to_string(),
    };
    storage.insert_existing(existing).expect("seed");

    let session = common::import_session(import_authorizer(), storage.clone(), PASSPHRASE).await;
    let err = session.process_payload(&codes[0]).await.unwrap_err();
    assert!(matches!(err, TransferError::DuplicateAccount(_)));
    assert_eq!(
        session.progress(),
        ImportProgress::Failed {
            kind: ErrorKind::DuplicateAccount
        }
    );
    assert_eq!(storage.len(), 1);
    assert_eq!(
        storage
            .get(&common::credentials("ada").identity)
            .expect("existing")
            .summary
            .fingerprint,
        "OLD"
    );
}

#[tokio::test]
async fn test_wrong_import_passphrase() {
    let codes = common::export_codes(common::credentials("ada"), 64).await;
    let storage = Arc::new(MemoryAccountStorage::new());
    let session = common::import_session(import_authorizer(), storage.clone(), "guess").await;

    let mut result = Ok(ScanOutcome::Dropped);
    for code in &codes {
        result = session.process_payload(code).await;
    }
    let err = result.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AuthorizationFailed);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_foreign_frames_are_ignored() {
    let ours = common::export_codes(common::credentials("ada"), 48).await;
    let theirs = common::export_codes(common::credentials("bob"), 4096).await;
    assert_ne!(ours.len(), theirs.len());

    let session = common::import_session(
        import_authorizer(),
        Arc::new(MemoryAccountStorage::new()),
        PASSPHRASE,
    )
    .await;

    session.process_payload(&ours[0]).await.expect("scan");
    assert_eq!(
        session.process_payload(&theirs[0]).await.expect("scan"),
        ScanOutcome::Ignored {
            reason: IgnoreReason::ForeignTransfer
        }
    );
    let kind = IgnoreReason::ForeignTransfer.kind().expect("per-frame kind");
    assert_eq!(kind, ErrorKind::ForeignFrame);
    assert!(kind.is_per_frame());
    let ImportProgress::Scanning { received, .. } = session.progress() else {
        panic!("expected scanning");
    };
    assert_eq!(received, 1);

    for code in &ours[1..] {
        session.process_payload(code).await.expect("scan");
    }
    assert_eq!(
        session.payload_summary().expect("summary").identity,
        common::credentials("ada").identity
    );
}

#[tokio::test]
async fn test_conflicting_frames_fail_session() {
    let first = common::export_codes(common::credentials("ada"), 48).await;
    let second = common::export_codes(common::credentials("ada"), 48).await;
    assert_eq!(first.len(), second.len());

    let session = common::import_session(
        import_authorizer(),
        Arc::new(MemoryAccountStorage::new()),
        PASSPHRASE,
    )
    .await;
    session.process_payload(&first[0]).await.expect("scan");
    let err = session.process_payload(&second[0]).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConflictingFrame);
    assert!(session.missing_frames().is_empty());
}

#[tokio::test]
async fn test_concurrent_authorize_is_rejected() {
    let authorizer = Arc::new(GatedAuthorizer::new(
        common::export_authorizer(),
        GatePoint::Authorize,
    ));
    let session = Arc::new(ExportSession::new(
        common::credentials("ada"),
        authorizer.clone(),
    ));

    let first = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .authorize(AuthMethod::passphrase(PASSPHRASE), 64)
                .await
        }
    });
    authorizer.entered.notified().await;
    assert_eq!(session.status(), ExportStatus::Authorizing);

    let second = session
        .authorize(AuthMethod::passphrase(PASSPHRASE), 64)
        .await;
    assert!(matches!(second, Err(TransferError::AlreadyInProgress)));
    assert_eq!(session.status(), ExportStatus::Authorizing);

    authorizer.gate.notify_one();
    let total = first.await.expect("join").expect("first authorize");
    assert_eq!(session.status(), ExportStatus::Ready { total });
}

#[tokio::test]
async fn test_cancel_during_authorize() {
    let authorizer = Arc::new(GatedAuthorizer::new(
        common::export_authorizer(),
        GatePoint::Authorize,
    ));
    let session = Arc::new(ExportSession::new(
        common::credentials("ada"),
        authorizer.clone(),
    ));

    let pending = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .authorize(AuthMethod::passphrase(PASSPHRASE), 64)
                .await
        }
    });
    authorizer.entered.notified().await;
    session.cancel();

    let result = pending.await.expect("join");
    assert!(matches!(result, Err(TransferError::Cancelled)));
    assert_eq!(
        session.status(),
        ExportStatus::Failed {
            kind: ErrorKind::Cancelled
        }
    );
    assert_eq!(authorizer.inner.outstanding_tokens(), 0);
}

#[tokio::test]
async fn test_scans_during_decryption_are_dropped() {
    let codes = common::export_codes(common::credentials("ada"), 4096).await;
    let authorizer = Arc::new(GatedAuthorizer::new(
        PassphraseAuthorizer::new(&common::fast_config()).expect("authorizer"),
        GatePoint::Decrypt,
    ));
    let session = Arc::new(
        common::import_session(
            authorizer.clone(),
            Arc::new(MemoryAccountStorage::new()),
            PASSPHRASE,
        )
        .await,
    );

    let last = tokio::spawn({
        let session = session.clone();
        let code = codes[0].clone();
        async move { session.process_payload(&code).await }
    });
    authorizer.entered.notified().await;

    assert_eq!(
        session.process_payload(&codes[0]).await.expect("scan"),
        ScanOutcome::Dropped
    );

    authorizer.gate.notify_one();
    assert_eq!(
        last.await.expect("join").expect("scan"),
        ScanOutcome::Finished
    );
}

#[tokio::test]
async fn test_cancel_during_decryption() {
    let codes = common::export_codes(common::credentials("ada"), 4096).await;
    let authorizer = Arc::new(GatedAuthorizer::new(
        PassphraseAuthorizer::new(&common::fast_config()).expect("authorizer"),
        GatePoint::Decrypt,
    ));
    let storage = Arc::new(MemoryAccountStorage::new());
    let session = Arc::new(
        common::import_session(authorizer.clone(), storage.clone(), PASSPHRASE).await,
    );

    let pending = tokio::spawn({
        let session = session.clone();
        let code = codes[0].clone();
        async move { session.process_payload(&code).await }
    });
    authorizer.entered.notified().await;
    session.cancel_transfer();

    assert!(matches!(
        pending.await.expect("join"),
        Err(TransferError::Cancelled)
    ));
    assert!(session.payload_summary().is_none());
    assert_eq!(authorizer.inner.outstanding_tokens(), 0);
    assert!(storage.is_empty());
}

#[tokio::test]
async fn test_cancel_during_commit_leaves_no_account() {
    let codes = common::export_codes(common::credentials("ada"), 4096).await;
    let storage = Arc::new(GatedStorage::default());
    let session = Arc::new(
        common::import_session(import_authorizer(), storage.clone(), PASSPHRASE).await,
    );
    session.process_payload(&codes[0]).await.expect("scan");

    let pending = tokio::spawn({
        let session = session.clone();
        async move { session.complete_transfer(AuthMethod::Biometric).await }
    });
    storage.entered.notified().await;
    session.cancel_transfer();
    storage.gate.notify_one();

    assert!(matches!(
        pending.await.expect("join"),
        Err(TransferError::Cancelled)
    ));
    assert!(storage.inner.is_empty());
    assert_eq!(
        session.progress(),
        ImportProgress::Failed {
            kind: ErrorKind::Cancelled
        }
    );
}

#[tokio::test]
async fn test_commit_resolving_after_cancel_is_rolled_back() {
    let codes = common::export_codes(common::credentials("ada"), 4096).await;
    let storage = Arc::new(CancellingStorage::default());
    let session = Arc::new(
        common::import_session(import_authorizer(), storage.clone(), PASSPHRASE).await,
    );
    assert!(storage.session.set(Arc::downgrade(&session)).is_ok());
    session.process_payload(&codes[0]).await.expect("scan");

    let result = session.complete_transfer(AuthMethod::Biometric).await;
    assert!(matches!(result, Err(TransferError::Cancelled)));
    assert!(storage.inner.is_empty());
    assert!(!storage
        .account_exists(&common::credentials("ada").identity)
        .await
        .expect("lookup"));
}

#[tokio::test]
async fn test_cancel_before_any_frame() {
    let storage = Arc::new(MemoryAccountStorage::new());
    let session = common::import_session(import_authorizer(), storage.clone(), PASSPHRASE).await;
    session.cancel_transfer();

    assert!(ErrorKind::Cancelled.is_user_cancellation());
    assert_eq!(
        session.progress(),
        ImportProgress::Failed {
            kind: ErrorKind::Cancelled
        }
    );
    assert!(matches!(
        session.process_payload("PBQR1:0:1:AA:00000000").await,
        Err(TransferError::Cancelled)
    ));
    assert!(storage.is_empty());
}
