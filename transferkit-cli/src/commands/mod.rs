pub mod export;
pub mod import;
pub mod inspect;

use transferkit_core::TransferError;

/// Puts the stable user message on top of the detailed error chain.
fn user_facing(err: TransferError) -> eyre::Report {
    let message = err.user_message();
    eyre::Report::new(err).wrap_err(message)
}
