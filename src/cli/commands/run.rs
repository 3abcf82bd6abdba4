//! The `run` command: wire everything up and monitor until cancelled.

use std::collections::BTreeSet;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::args::RunArgs;
use crate::config;
use crate::error::CraftwatchError;
use crate::monitor::{Notification, PollScheduler, ReconciliationEngine, Status};
use crate::notify::{DiscordSink, NotificationSink, run_notifier};
use crate::observability;
use crate::probe::{RconRoster, SftpProbe};

/// Size of the outbound notification queue. Deep enough that a tick's
/// worth of roster churn never blocks the polling side on a slow API.
const OUTBOUND_QUEUE: usize = 64;

/// Starts the monitor loop and runs it until the token is cancelled.
///
/// # Errors
///
/// Returns an error if configuration loading, metrics setup, or the
/// sink's startup preparation fails. Once the loop is running, transient
/// failures are logged and absorbed, never returned.
pub async fn run(args: &RunArgs, cancel: CancellationToken) -> Result<(), CraftwatchError> {
    if let Some(port) = args.metrics_port {
        observability::init_metrics(Some(port))?;
        info!(port, "Prometheus metrics endpoint started");
    }

    info!(config = %args.config.display(), "loading configuration");
    let config = config::load(&args.config)?;

    let mut sink = DiscordSink::new(config.discord.clone(), config.monitor.poll_interval)?;
    sink.prepare().await?;

    let engine = ReconciliationEngine::new(config.monitor.stale_after);
    let freshness = SftpProbe::new(config.log_source.clone());
    let roster = RconRoster::new(config.rcon.clone());

    let (outbound, inbound) = mpsc::channel(OUTBOUND_QUEUE);

    // Pin the initial status before the first tick so the channel shows
    // something immediately after a restart.
    let _ = outbound
        .send(Notification::Publish {
            status: Status::Offline,
            roster: BTreeSet::new(),
        })
        .await;

    let scheduler = PollScheduler::new(
        freshness,
        roster,
        engine,
        config.monitor.poll_interval,
        outbound,
        cancel.clone(),
    );

    let notifier = tokio::spawn(run_notifier(sink, inbound));
    let poller = tokio::spawn(scheduler.run());

    poller
        .await
        .map_err(|e| CraftwatchError::Io(std::io::Error::other(e.to_string())))?;
    // The poller dropped its sender; the notifier drains what is queued
    // and exits.
    notifier
        .await
        .map_err(|e| CraftwatchError::Io(std::io::Error::other(e.to_string())))?;

    info!("monitor stopped");
    Ok(())
}
