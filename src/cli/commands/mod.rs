//! Command handlers.

mod check;
mod run;
mod validate;

use tokio_util::sync::CancellationToken;

use crate::cli::args::{Cli, Commands};
use crate::error::CraftwatchError;

/// Dispatches the parsed CLI to its handler.
///
/// # Errors
///
/// Propagates whatever the selected command returns.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), CraftwatchError> {
    match cli.command {
        Commands::Run(args) => run::run(&args, cancel).await,
        Commands::Check(args) => check::run(&args).await,
        Commands::Validate(args) => validate::run(&args),
    }
}
