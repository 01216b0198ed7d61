use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use eyre::{eyre, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use transferkit_core::{
    AuthMethod, Authorizer, ErrorKind, ImportSession, PassphraseAuthorizer, ScanOutcome,
    TransferConfig,
};

use super::user_facing;
use crate::config::default_store_dir;
use crate::store::FileAccountStore;

#[derive(Args)]
pub struct ImportArgs {
    /// Passphrase of the transferred account.
    #[arg(long, env = "TRANSFERKIT_PASSPHRASE", hide_env_values = true)]
    passphrase: String,

    /// Passphrase protecting the key on this device.
    #[arg(long, env = "TRANSFERKIT_LOCAL_PASSPHRASE", hide_env_values = true)]
    local_passphrase: String,

    /// Account store directory. Defaults to `<data dir>/transferkit`.
    #[arg(long, env = "TRANSFERKIT_STORE_DIR")]
    store: Option<PathBuf>,

    /// Read code strings from this file instead of stdin.
    #[arg(long)]
    input: Option<PathBuf>,
}

pub async fn run(args: ImportArgs, config: &TransferConfig) -> Result<()> {
    let store_dir = args.store.unwrap_or_else(default_store_dir);
    let storage = Arc::new(FileAccountStore::open(&store_dir, config).await?);
    let authorizer = Arc::new(PassphraseAuthorizer::new(config)?);
    let token = authorizer
        .authorize(AuthMethod::passphrase(args.passphrase))
        .await?;
    let session = ImportSession::new(config, authorizer, storage.clone(), token);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => Box::new(BufReader::new(tokio::fs::File::open(path).await?)),
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    let finished = loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            signal = tokio::signal::ctrl_c() => {
                signal?;
                session.cancel_transfer();
                eyre::bail!("import cancelled");
            }
        };
        let Some(line) = line else {
            break false;
        };
        if line.trim().is_empty() {
            continue;
        }

        match session.process_payload(&line).await.map_err(user_facing)? {
            ScanOutcome::Progress { received, total } => {
                tracing::info!(received, total, "frame accepted");
            }
            ScanOutcome::Finished => break true,
            ScanOutcome::Ignored { reason } => tracing::warn!(
                ?reason,
                hint = reason.kind().map_or("", ErrorKind::user_message),
                "code ignored"
            ),
            ScanOutcome::Dropped => {}
        }
    };

    if !finished {
        let missing = session.missing_frames();
        session.cancel_transfer();
        eyre::bail!(
            "input ended with {} frame(s) missing: {missing:?}",
            missing.len()
        );
    }

    let summary = session
        .payload_summary()
        .ok_or_else(|| eyre!("decoded payload is no longer available"))?;
    tracing::info!(
        account = %summary.identity,
        fingerprint = %summary.fingerprint,
        "payload decoded"
    );

    let handle = session
        .complete_transfer(AuthMethod::passphrase(args.local_passphrase))
        .await
        .map_err(user_facing)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "id": handle.id,
            "account": handle.identity.to_string(),
            "store": storage.path(),
            "stored_accounts": storage.accounts().await?.len(),
        }))?
    );
    Ok(())
}
