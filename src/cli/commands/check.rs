//! The `check` command: one observation and one query, then report.
//!
//! Exercises both adapters against the real endpoints without starting
//! the loop or posting to the notification channel. Useful for verifying
//! credentials after editing the configuration.

use tracing::{info, warn};

use crate::cli::args::CheckArgs;
use crate::config;
use crate::error::CraftwatchError;
use crate::monitor::engine::SHUTDOWN_MARKER;
use crate::probe::{FreshnessSource, RconRoster, RosterSource, SftpProbe};

/// Probes both sources once.
///
/// # Errors
///
/// Returns the first source failure after both have been attempted and
/// reported, so a single run surfaces problems with either endpoint.
pub async fn run(args: &CheckArgs) -> Result<(), CraftwatchError> {
    let config = config::load(&args.config)?;

    let mut probe = SftpProbe::new(config.log_source.clone());
    let observation = probe.observe().await;
    match &observation {
        Ok(obs) => info!(
            log_age_secs = obs.age().as_secs(),
            tail_bytes = obs.tail_text.len(),
            stopping = obs.tail_text.contains(SHUTDOWN_MARKER),
            "freshness source reachable"
        ),
        Err(err) => warn!(error = %err, "freshness source failed"),
    }
    probe.close().await;

    let roster = RconRoster::new(config.rcon.clone());
    let snapshot = roster.query().await;
    match &snapshot {
        Ok(snap) => info!(
            players = snap.player_names.len(),
            "roster query reachable"
        ),
        Err(err) => warn!(error = %err, "roster query failed"),
    }

    observation?;
    snapshot?;
    Ok(())
}
