//! Notification delivery.
//!
//! The polling side never talks to the channel directly: it hands
//! [`Notification`](crate::monitor::Notification)s to the notifier task,
//! which renders and posts them through a [`NotificationSink`]. Sink
//! failures are logged and dropped; a flaky channel never stalls or
//! kills the monitor loop.

pub mod discord;
pub mod message;

use std::collections::BTreeSet;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::NotifyError;
use crate::monitor::Notification;
use crate::monitor::state::{Event, Status};
use crate::observability::metrics;

pub use discord::DiscordSink;

/// Where rendered notifications go.
#[async_trait]
pub trait NotificationSink: Send {
    /// One-time startup work: clean up leftovers from a prior run so at
    /// most one pinned status message exists afterwards.
    async fn prepare(&mut self) -> Result<(), NotifyError>;

    /// Replaces the pinned status message with a freshly composed one so
    /// it is again the most recent message in the channel.
    async fn publish(
        &mut self,
        status: Status,
        roster: &BTreeSet<String>,
    ) -> Result<(), NotifyError>;

    /// Posts a standalone message for a join/leave event.
    async fn notify(&mut self, event: &Event) -> Result<(), NotifyError>;
}

/// Drains the outbound channel into the sink, in channel order.
///
/// Returns when the channel closes (the scheduler has stopped and every
/// queued notification has been attempted).
pub async fn run_notifier<S: NotificationSink>(
    mut sink: S,
    mut inbound: mpsc::Receiver<Notification>,
) {
    while let Some(notification) = inbound.recv().await {
        let result = match &notification {
            Notification::Publish { status, roster } => {
                let result = sink.publish(*status, roster).await;
                if result.is_ok() {
                    metrics::record_notification("status");
                }
                result
            }
            Notification::Event(event) => {
                let result = sink.notify(event).await;
                if result.is_ok() {
                    metrics::record_notification(match event {
                        Event::PlayerJoined { .. } => "join",
                        Event::PlayerLeft { .. } => "leave",
                        Event::StatusChanged { .. } => "status",
                    });
                }
                result
            }
        };
        if let Err(err) = result {
            metrics::record_notify_failure();
            warn!(error = %err, "dropping notification after channel failure");
        }
    }
    debug!("notification channel drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        log: Arc<Mutex<Vec<String>>>,
        fail_next: bool,
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn prepare(&mut self) -> Result<(), NotifyError> {
            Ok(())
        }

        async fn publish(
            &mut self,
            status: Status,
            roster: &BTreeSet<String>,
        ) -> Result<(), NotifyError> {
            if self.fail_next {
                self.fail_next = false;
                return Err(NotifyError::Status {
                    code: 500,
                    endpoint: "test".to_string(),
                });
            }
            self.log
                .lock()
                .unwrap()
                .push(format!("publish {status} [{}]", roster.len()));
            Ok(())
        }

        async fn notify(&mut self, event: &Event) -> Result<(), NotifyError> {
            self.log.lock().unwrap().push(format!("notify {event:?}"));
            Ok(())
        }
    }

    #[tokio::test]
    async fn notifier_preserves_channel_order_and_drains() {
        let sink = RecordingSink::default();
        let log = Arc::clone(&sink.log);
        let (tx, rx) = mpsc::channel(8);

        tx.send(Notification::Event(Event::PlayerJoined {
            name: "Carol".to_string(),
        }))
        .await
        .unwrap();
        tx.send(Notification::Event(Event::PlayerLeft {
            name: "Alice".to_string(),
        }))
        .await
        .unwrap();
        tx.send(Notification::Publish {
            status: Status::Online,
            roster: BTreeSet::from(["Bob".to_string(), "Carol".to_string()]),
        })
        .await
        .unwrap();
        drop(tx);

        run_notifier(sink, rx).await;

        let log = log.lock().unwrap();
        assert_eq!(log.len(), 3);
        assert!(log[0].contains("Carol"));
        assert!(log[1].contains("Alice"));
        assert_eq!(log[2], "publish ONLINE [2]");
    }

    #[tokio::test]
    async fn notifier_survives_sink_failures() {
        let sink = RecordingSink {
            fail_next: true,
            ..RecordingSink::default()
        };
        let log = Arc::clone(&sink.log);
        let (tx, rx) = mpsc::channel(8);

        tx.send(Notification::Publish {
            status: Status::Offline,
            roster: BTreeSet::new(),
        })
        .await
        .unwrap();
        tx.send(Notification::Publish {
            status: Status::Starting,
            roster: BTreeSet::new(),
        })
        .await
        .unwrap();
        drop(tx);

        run_notifier(sink, rx).await;

        // First publish failed and was dropped; the loop carried on.
        let log = log.lock().unwrap();
        assert_eq!(log.as_slice(), ["publish STARTING [0]"]);
    }
}
