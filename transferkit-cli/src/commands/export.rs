use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use eyre::Result;
use secrecy::SecretString;
use tokio::io::AsyncWriteExt;
use transferkit_core::{AuthMethod, ExportSession, PassphraseAuthorizer, TransferConfig};

use super::user_facing;
use crate::account::AccountFile;

#[derive(Args)]
pub struct ExportArgs {
    /// Account JSON file.
    account: PathBuf,

    /// Account passphrase. The importing side needs the same one.
    #[arg(long, env = "TRANSFERKIT_PASSPHRASE", hide_env_values = true)]
    passphrase: String,

    /// Pause between frames, in milliseconds.
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
}

pub async fn run(args: ExportArgs, config: &TransferConfig) -> Result<()> {
    let credentials = AccountFile::read(&args.account)?.into_credentials();
    let passphrase = SecretString::from(args.passphrase);
    let authorizer = PassphraseAuthorizer::new(config)?.with_passphrase(&passphrase)?;
    let session = ExportSession::new(credentials, Arc::new(authorizer));

    let total = session
        .authorize(AuthMethod::Passphrase(passphrase), config.max_fragment_size)
        .await
        .map_err(user_facing)?;
    tracing::info!(total, fragment_size = config.max_fragment_size, "exporting account");

    let pace = Duration::from_millis(args.interval_ms);
    let mut stdout = tokio::io::stdout();
    while let Some(frame) = session.next_frame().map_err(user_facing)? {
        stdout.write_all(frame.to_code_string().as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        tracing::debug!(index = frame.index, total = frame.total, "frame written");

        if !pace.is_zero() && !frame.is_last() {
            tokio::select! {
                () = tokio::time::sleep(pace) => {}
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    session.cancel();
                    eyre::bail!("export cancelled");
                }
            }
        }
    }

    tracing::info!("all frames written");
    Ok(())
}
