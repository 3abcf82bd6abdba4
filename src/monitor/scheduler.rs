//! The poll scheduler.
//!
//! Drives the reconciliation engine at a fixed period. Within a tick the
//! freshness observation, the optional roster query, and the state
//! mutation run strictly in sequence; ticks never overlap. Events are
//! handed to the notifier task over an mpsc channel, so a slow channel
//! post can never stall the observation cadence (only delay delivery).

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::observability::metrics;
use crate::probe::{FreshnessSource, RosterSource};

use super::engine::ReconciliationEngine;
use super::state::{Event, Status};

/// What the polling side asks the notifier task to post.
///
/// Channel order is the externally visible notification order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Replace the pinned status message.
    Publish {
        /// Status to display.
        status: Status,
        /// Roster snapshot taken at the end of the tick.
        roster: BTreeSet<String>,
    },
    /// Post a standalone join/leave line.
    Event(Event),
}

/// Fixed-period driver for the engine.
pub struct PollScheduler<F, R> {
    freshness: F,
    roster: R,
    engine: ReconciliationEngine,
    period: Duration,
    outbound: mpsc::Sender<Notification>,
    cancel: CancellationToken,
}

impl<F, R> PollScheduler<F, R>
where
    F: FreshnessSource,
    R: RosterSource,
{
    /// Creates a scheduler; nothing runs until [`run`](Self::run).
    pub const fn new(
        freshness: F,
        roster: R,
        engine: ReconciliationEngine,
        period: Duration,
        outbound: mpsc::Sender<Notification>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            freshness,
            roster,
            engine,
            period,
            outbound,
            cancel,
        }
    }

    /// Runs the tick loop until cancellation, then releases the
    /// freshness connection.
    ///
    /// The first tick fires immediately; a tick that overruns the period
    /// delays the next one rather than bursting to catch up.
    pub async fn run(mut self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(period_secs = self.period.as_secs(), "monitor loop started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("monitor loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    self.tick_once().await;
                }
            }
        }

        self.freshness.close().await;
        debug!("freshness source released");
    }

    async fn tick_once(&mut self) {
        metrics::record_tick();

        let observation = self.freshness.observe().await;
        let events = self.engine.tick(observation, &self.roster).await;

        for event in events {
            let message = match event {
                Event::StatusChanged { to } => Notification::Publish {
                    status: to,
                    roster: self.engine.roster().clone(),
                },
                other => Notification::Event(other),
            };
            if self.outbound.send(message).await.is_err() {
                // Notifier is gone; nothing left to report to.
                info!("notification channel closed, stopping monitor loop");
                self.cancel.cancel();
                return;
            }
        }
    }
}
