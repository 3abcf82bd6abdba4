//! The reconciliation engine.
//!
//! Fuses the per-tick freshness observation with an on-demand roster query
//! into one consistent status. The roster query is authoritative once the
//! server answers it (it cleanly separates STARTING from ONLINE); the log
//! signal is the fallback used to detect shutdown or staleness when the
//! query goes quiet, because a crashed process stops answering queries
//! long before its log would ever say so.

use std::mem;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::ConnectionError;
use crate::observability::metrics;
use crate::probe::RosterSource;

use super::state::{EngineState, Event, LogObservation, Status};

/// The literal tail substring that marks an orderly shutdown in progress.
pub const SHUTDOWN_MARKER: &str = "Stopping server";

/// Default age beyond which the log no longer counts as a heartbeat.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(40);

/// The state machine at the center of the monitor.
///
/// Owns [`EngineState`] exclusively. [`tick`](Self::tick) is the only
/// mutation point and is never re-entered: the scheduler awaits each tick
/// to completion before starting the next, so there is no locking here.
#[derive(Debug)]
pub struct ReconciliationEngine {
    state: EngineState,
    stale_after: Duration,
}

impl ReconciliationEngine {
    /// Creates an engine in the initial state: OFFLINE, no last-seen
    /// time, empty roster.
    #[must_use]
    pub fn new(stale_after: Duration) -> Self {
        Self {
            state: EngineState::default(),
            stale_after,
        }
    }

    /// Current fused status.
    #[must_use]
    pub const fn status(&self) -> Status {
        self.state.status
    }

    /// Players currently believed connected.
    #[must_use]
    pub const fn roster(&self) -> &std::collections::BTreeSet<String> {
        &self.state.current_roster
    }

    /// Read-only view of the full engine state.
    #[must_use]
    pub const fn state(&self) -> &EngineState {
        &self.state
    }

    /// Processes one tick.
    ///
    /// Takes this tick's freshness result and a roster source to consult
    /// in the states where the roster matters. Returns the events of the
    /// tick in notification order: joins, then leaves, then the status
    /// refresh, if any.
    ///
    /// A failed observation changes nothing: the state is held as-is and
    /// no roster query is attempted.
    pub async fn tick(
        &mut self,
        observation: Result<LogObservation, ConnectionError>,
        roster_source: &dyn RosterSource,
    ) -> Vec<Event> {
        let observation = match observation {
            Ok(obs) => obs,
            Err(err) => {
                metrics::record_probe_failure();
                warn!(error = %err, "freshness source unreachable, holding current state");
                return Vec::new();
            }
        };

        let log_age = observation.age();
        let stale = log_age > self.stale_after;
        let stopping = observation.tail_text.contains(SHUTDOWN_MARKER);
        debug!(
            log_age_secs = log_age.as_secs(),
            stale,
            stopping,
            status = %self.state.status,
            "tick observation"
        );

        let events = match self.state.status {
            Status::Offline => self.tick_offline(&observation, stale, stopping),
            Status::Starting => self.tick_starting(roster_source, stale, stopping).await,
            Status::Online => self.tick_online(roster_source, stale, stopping, log_age).await,
        };

        // Recorded on every successful observation, transition or not.
        self.state.last_seen_modification_time = Some(observation.modification_time);

        events
    }

    fn tick_offline(&mut self, observation: &LogObservation, stale: bool, stopping: bool) -> Vec<Event> {
        let mtime_moved = self
            .state
            .last_seen_modification_time
            .is_none_or(|seen| seen != observation.modification_time);
        let fresh_activity = !stale && !stopping && mtime_moved;

        if fresh_activity {
            info!("log activity detected, server is starting");
            self.transition(Status::Starting);
            self.state.current_roster.clear();
            vec![Event::StatusChanged {
                to: Status::Starting,
            }]
        } else {
            Vec::new()
        }
    }

    async fn tick_starting(
        &mut self,
        roster_source: &dyn RosterSource,
        stale: bool,
        stopping: bool,
    ) -> Vec<Event> {
        if stopping {
            info!("shutdown marker seen while starting, back to offline");
            self.transition(Status::Offline);
            self.state.current_roster.clear();
            return vec![Event::StatusChanged { to: Status::Offline }];
        }
        if stale {
            info!("log went stale while starting, back to offline");
            self.transition(Status::Offline);
            self.state.current_roster.clear();
            return vec![Event::StatusChanged { to: Status::Offline }];
        }

        match roster_source.query().await {
            Ok(snapshot) => {
                info!(players = snapshot.player_names.len(), "roster query answered, server online");
                self.transition(Status::Online);
                self.state.current_roster = snapshot.player_names;
                vec![Event::StatusChanged { to: Status::Online }]
            }
            Err(err) => {
                metrics::record_query_failure();
                debug!(error = %err, "roster query not answering yet, still starting");
                Vec::new()
            }
        }
    }

    async fn tick_online(
        &mut self,
        roster_source: &dyn RosterSource,
        stale: bool,
        stopping: bool,
        log_age: Duration,
    ) -> Vec<Event> {
        match roster_source.query().await {
            Ok(snapshot) => self.diff_roster(snapshot.player_names),
            Err(err) => {
                metrics::record_query_failure();
                if stopping || stale {
                    if stopping {
                        info!("roster query down and shutdown marker seen, server offline");
                    } else {
                        info!(
                            log_age_secs = log_age.as_secs(),
                            "roster query down and log stale, server offline"
                        );
                    }
                    let mut events: Vec<Event> = mem::take(&mut self.state.current_roster)
                        .into_iter()
                        .map(|name| Event::PlayerLeft { name })
                        .collect();
                    self.transition(Status::Offline);
                    events.push(Event::StatusChanged { to: Status::Offline });
                    events
                } else {
                    // Query outage with a healthy log signal is explicitly
                    // tolerated; the server is still writing.
                    info!(
                        error = %err,
                        log_age_secs = log_age.as_secs(),
                        "roster query failed but log is fresh, staying online"
                    );
                    Vec::new()
                }
            }
        }
    }

    /// Applies a fresh roster snapshot while online.
    ///
    /// Emits one `PlayerJoined` per arrival then one `PlayerLeft` per
    /// departure, followed by a `StatusChanged { Online }` refresh for the
    /// pinned display. No churn means no events and an untouched roster.
    fn diff_roster(&mut self, new_names: std::collections::BTreeSet<String>) -> Vec<Event> {
        let joined: Vec<String> = new_names
            .difference(&self.state.current_roster)
            .cloned()
            .collect();
        let left: Vec<String> = self
            .state
            .current_roster
            .difference(&new_names)
            .cloned()
            .collect();

        if joined.is_empty() && left.is_empty() {
            return Vec::new();
        }

        let mut events = Vec::with_capacity(joined.len() + left.len() + 1);
        for name in joined {
            info!(player = %name, "player joined");
            events.push(Event::PlayerJoined { name });
        }
        for name in left {
            info!(player = %name, "player left");
            events.push(Event::PlayerLeft { name });
        }
        self.state.current_roster = new_names;
        events.push(Event::StatusChanged { to: Status::Online });
        events
    }

    fn transition(&mut self, to: Status) {
        info!(from = %self.state.status, to = %to, "status transition");
        metrics::record_transition(match to {
            Status::Offline => "offline",
            Status::Starting => "starting",
            Status::Online => "online",
        });
        self.state.status = to;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use crate::monitor::state::RosterSnapshot;
    use async_trait::async_trait;
    use chrono::{TimeDelta, Utc};
    use std::sync::Mutex;

    /// Scripted roster source: each query consumes the next canned result
    /// in order, and panics if queried more often than the test scripted.
    struct ScriptedRoster {
        replies: Mutex<std::collections::VecDeque<Result<RosterSnapshot, QueryError>>>,
    }

    impl ScriptedRoster {
        fn with(replies: Vec<Result<RosterSnapshot, QueryError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }

        fn unreachable() -> Self {
            Self::with(Vec::new())
        }

        fn remaining(&self) -> usize {
            self.replies.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl RosterSource for ScriptedRoster {
        async fn query(&self) -> Result<RosterSnapshot, QueryError> {
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("roster queried more often than the test scripted")
        }
    }

    fn observation(age_secs: i64, tail: &str) -> LogObservation {
        let now = Utc::now();
        LogObservation {
            modification_time: now - TimeDelta::seconds(age_secs),
            tail_text: tail.to_string(),
            observed_at: now,
        }
    }

    fn engine() -> ReconciliationEngine {
        ReconciliationEngine::new(DEFAULT_STALE_AFTER)
    }

    fn ok_roster(names: &[&str]) -> Result<RosterSnapshot, QueryError> {
        Ok(RosterSnapshot::from_names(names.iter().copied()))
    }

    fn query_failed() -> Result<RosterSnapshot, QueryError> {
        Err(QueryError::ConnectionClosed)
    }

    #[tokio::test]
    async fn probe_failure_holds_state_and_skips_roster() {
        let mut engine = engine();
        let roster = ScriptedRoster::unreachable();

        let events = engine
            .tick(
                Err(ConnectionError::Throttled {
                    retry_in: Duration::from_secs(9),
                }),
                &roster,
            )
            .await;

        assert!(events.is_empty());
        assert_eq!(engine.status(), Status::Offline);
        assert!(engine.state().last_seen_modification_time.is_none());
    }

    #[tokio::test]
    async fn probe_failure_holds_state_while_online() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![ok_roster(&["Alice"])]);
        engine.tick(Ok(observation(2, "")), &roster).await; // -> STARTING
        engine.tick(Ok(observation(2, "")), &roster).await; // -> ONLINE, {Alice}

        // A query on this tick would panic the scripted source.
        let events = engine
            .tick(Err(ConnectionError::TaskFailed("gone".into())), &roster)
            .await;

        assert!(events.is_empty());
        assert_eq!(engine.status(), Status::Online);
        assert!(engine.roster().contains("Alice"));
        assert_eq!(roster.remaining(), 0);
    }

    // Scenario A: fresh first observation wakes the machine up.
    #[tokio::test]
    async fn offline_to_starting_on_fresh_activity() {
        let mut engine = engine();
        let roster = ScriptedRoster::unreachable();

        let events = engine.tick(Ok(observation(2, "")), &roster).await;

        assert_eq!(
            events,
            vec![Event::StatusChanged {
                to: Status::Starting
            }]
        );
        assert_eq!(engine.status(), Status::Starting);
        assert!(engine.roster().is_empty());
        assert!(engine.state().last_seen_modification_time.is_some());
    }

    #[tokio::test]
    async fn offline_stays_offline_on_stale_log() {
        let mut engine = engine();
        let roster = ScriptedRoster::unreachable();

        let events = engine.tick(Ok(observation(120, "")), &roster).await;

        assert!(events.is_empty());
        assert_eq!(engine.status(), Status::Offline);
        // Still recorded, even with no transition.
        assert!(engine.state().last_seen_modification_time.is_some());
    }

    #[tokio::test]
    async fn offline_stays_offline_on_shutdown_marker() {
        let mut engine = engine();
        let roster = ScriptedRoster::unreachable();

        let events = engine
            .tick(Ok(observation(2, "[Server] Stopping server")), &roster)
            .await;

        assert!(events.is_empty());
        assert_eq!(engine.status(), Status::Offline);
    }

    #[tokio::test]
    async fn offline_stays_offline_on_duplicate_mtime() {
        let mut engine = engine();
        let roster = ScriptedRoster::unreachable();

        // Stale observation records its mtime but stays OFFLINE.
        let stale = observation(120, "");
        engine.tick(Ok(stale.clone()), &roster).await;
        assert_eq!(engine.status(), Status::Offline);

        // Now the same mtime shows up looking fresh (e.g. a wall-clock
        // hiccup). Unchanged mtime is not fresh activity.
        let duplicate = LogObservation {
            modification_time: stale.modification_time,
            tail_text: String::new(),
            observed_at: stale.modification_time + TimeDelta::seconds(2),
        };
        let events = engine.tick(Ok(duplicate), &roster).await;
        assert!(events.is_empty());
        assert_eq!(engine.status(), Status::Offline);
    }

    // Scenario B: shutdown marker during STARTING, before any query.
    #[tokio::test]
    async fn starting_to_offline_on_shutdown_marker() {
        let mut engine = engine();
        let roster = ScriptedRoster::unreachable();
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine
            .tick(Ok(observation(1, "12:00:00 Stopping server...")), &roster)
            .await;

        assert_eq!(events, vec![Event::StatusChanged { to: Status::Offline }]);
        assert_eq!(engine.status(), Status::Offline);
        assert!(engine.roster().is_empty());
        // The unreachable scripted source proves no query was attempted.
    }

    #[tokio::test]
    async fn starting_to_offline_on_stale_log() {
        let mut engine = engine();
        let roster = ScriptedRoster::unreachable();
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine.tick(Ok(observation(41, "")), &roster).await;

        assert_eq!(events, vec![Event::StatusChanged { to: Status::Offline }]);
        assert_eq!(engine.status(), Status::Offline);
    }

    // Scenario C: roster answers during STARTING.
    #[tokio::test]
    async fn starting_to_online_when_query_answers() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![ok_roster(&["Alice", "Bob"])]);
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine.tick(Ok(observation(5, "")), &roster).await;

        assert_eq!(events, vec![Event::StatusChanged { to: Status::Online }]);
        assert_eq!(engine.status(), Status::Online);
        let names: Vec<_> = engine.roster().iter().cloned().collect();
        assert_eq!(names, vec!["Alice".to_string(), "Bob".to_string()]);
    }

    #[tokio::test]
    async fn starting_holds_when_query_fails() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![query_failed()]);
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine.tick(Ok(observation(5, "")), &roster).await;

        assert!(events.is_empty());
        assert_eq!(engine.status(), Status::Starting);
    }

    // Scenario D: roster churn while online.
    #[tokio::test]
    async fn online_roster_diff_emits_joins_then_leaves_then_refresh() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![
            ok_roster(&["Alice", "Bob"]),
            ok_roster(&["Bob", "Carol"]),
        ]);
        engine.tick(Ok(observation(2, "")), &roster).await;
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine.tick(Ok(observation(2, "")), &roster).await;

        assert_eq!(
            events,
            vec![
                Event::PlayerJoined {
                    name: "Carol".to_string()
                },
                Event::PlayerLeft {
                    name: "Alice".to_string()
                },
                Event::StatusChanged { to: Status::Online },
            ]
        );
        let names: Vec<_> = engine.roster().iter().cloned().collect();
        assert_eq!(names, vec!["Bob".to_string(), "Carol".to_string()]);
    }

    // Idempotence: identical snapshots produce nothing.
    #[tokio::test]
    async fn online_identical_roster_is_silent() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![
            ok_roster(&["Alice"]),
            ok_roster(&["Alice"]),
            ok_roster(&["Alice"]),
        ]);
        engine.tick(Ok(observation(2, "")), &roster).await;
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine.tick(Ok(observation(2, "")), &roster).await;
        assert!(events.is_empty());
        let events = engine.tick(Ok(observation(2, "")), &roster).await;
        assert!(events.is_empty());
        assert!(engine.roster().contains("Alice"));
    }

    // Scenario E: query outage with a fresh log is tolerated.
    #[tokio::test]
    async fn online_tolerates_query_outage_while_log_fresh() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![ok_roster(&["Alice"]), query_failed()]);
        engine.tick(Ok(observation(2, "")), &roster).await;
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine.tick(Ok(observation(10, "")), &roster).await;

        assert!(events.is_empty());
        assert_eq!(engine.status(), Status::Online);
        assert!(engine.roster().contains("Alice"));
    }

    // Scenario F: query outage plus stale log drains the roster.
    #[tokio::test]
    async fn online_to_offline_on_outage_and_stale_log() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![ok_roster(&["Alice"]), query_failed()]);
        engine.tick(Ok(observation(2, "")), &roster).await;
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine.tick(Ok(observation(50, "")), &roster).await;

        assert_eq!(
            events,
            vec![
                Event::PlayerLeft {
                    name: "Alice".to_string()
                },
                Event::StatusChanged { to: Status::Offline },
            ]
        );
        assert_eq!(engine.status(), Status::Offline);
        assert!(engine.roster().is_empty());
    }

    #[tokio::test]
    async fn online_to_offline_on_outage_and_marker_drains_whole_roster() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![ok_roster(&["Alice", "Bob", "Zed"]), query_failed()]);
        engine.tick(Ok(observation(2, "")), &roster).await;
        engine.tick(Ok(observation(2, "")), &roster).await;

        let events = engine
            .tick(Ok(observation(3, "... Stopping server ...")), &roster)
            .await;

        // One PlayerLeft per known player, deterministic order, then the refresh.
        assert_eq!(
            events,
            vec![
                Event::PlayerLeft {
                    name: "Alice".to_string()
                },
                Event::PlayerLeft {
                    name: "Bob".to_string()
                },
                Event::PlayerLeft {
                    name: "Zed".to_string()
                },
                Event::StatusChanged { to: Status::Offline },
            ]
        );
        assert!(engine.roster().is_empty());
    }

    #[tokio::test]
    async fn roster_nonempty_implies_online_across_lifecycle() {
        let mut engine = engine();
        let roster = ScriptedRoster::with(vec![ok_roster(&["Alice"]), query_failed()]);
        engine.tick(Ok(observation(2, "")), &roster).await;
        assert!(engine.roster().is_empty() || engine.status() == Status::Online);
        engine.tick(Ok(observation(2, "")), &roster).await;
        assert!(engine.roster().is_empty() || engine.status() == Status::Online);
        engine.tick(Ok(observation(50, "")), &roster).await;
        assert!(engine.roster().is_empty() || engine.status() == Status::Online);
    }

    #[tokio::test]
    async fn last_seen_updates_on_every_successful_tick() {
        let mut engine = engine();
        let roster = ScriptedRoster::unreachable();

        let first = observation(120, "");
        engine.tick(Ok(first.clone()), &roster).await;
        assert_eq!(
            engine.state().last_seen_modification_time,
            Some(first.modification_time)
        );

        // Duplicate/stale observation still refreshes the stored value.
        let second = observation(130, "");
        engine.tick(Ok(second.clone()), &roster).await;
        assert_eq!(
            engine.state().last_seen_modification_time,
            Some(second.modification_time)
        );
    }
}
