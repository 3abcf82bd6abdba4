//! The `validate` command: load and validate configuration files.

use tracing::info;

use crate::cli::args::ValidateArgs;
use crate::config;
use crate::error::CraftwatchError;

/// Validates each file in turn, stopping at the first failure.
///
/// # Errors
///
/// Returns the first [`crate::error::ConfigError`] encountered.
pub fn run(args: &ValidateArgs) -> Result<(), CraftwatchError> {
    for path in &args.files {
        info!(file = %path.display(), "validating configuration");
        config::load(path)?;
        info!(file = %path.display(), "configuration valid");
    }
    Ok(())
}
