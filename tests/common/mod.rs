//! Shared fakes for integration tests: scripted observation sources and
//! a recording sink.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeDelta, Utc};

use craftwatch::error::{ConnectionError, NotifyError, QueryError};
use craftwatch::monitor::state::{Event, LogObservation, RosterSnapshot, Status};
use craftwatch::notify::NotificationSink;
use craftwatch::probe::{FreshnessSource, RosterSource};

/// Builds an observation whose log is `age_secs` old at observation time.
pub fn observation(age_secs: i64, tail: &str) -> LogObservation {
    let now = Utc::now();
    LogObservation {
        modification_time: now - TimeDelta::seconds(age_secs),
        tail_text: tail.to_string(),
        observed_at: now,
    }
}

/// Freshness source that replays a script, then fails.
pub struct ScriptedFreshness {
    script: Mutex<VecDeque<Result<LogObservation, ConnectionError>>>,
    pub observations: Arc<AtomicUsize>,
    pub closed: Arc<AtomicBool>,
}

impl ScriptedFreshness {
    pub fn new(script: Vec<Result<LogObservation, ConnectionError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            observations: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl FreshnessSource for ScriptedFreshness {
    async fn observe(&mut self) -> Result<LogObservation, ConnectionError> {
        self.observations.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(ConnectionError::TaskFailed(
                "script exhausted".to_string(),
            )))
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Roster source that replays a script, then fails.
pub struct ScriptedRoster {
    script: Mutex<VecDeque<Result<RosterSnapshot, QueryError>>>,
}

impl ScriptedRoster {
    pub fn new(script: Vec<Result<RosterSnapshot, QueryError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }

    pub fn ok(names: &[&str]) -> Result<RosterSnapshot, QueryError> {
        Ok(RosterSnapshot::from_names(names.iter().copied()))
    }

    pub fn failed() -> Result<RosterSnapshot, QueryError> {
        Err(QueryError::ConnectionClosed)
    }
}

#[async_trait]
impl RosterSource for ScriptedRoster {
    async fn query(&self) -> Result<RosterSnapshot, QueryError> {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(QueryError::ConnectionClosed))
    }
}

/// What the recording sink saw, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Publish(Status, Vec<String>),
    Join(String),
    Leave(String),
}

/// Sink that records every call instead of talking to any API.
#[derive(Default)]
pub struct RecordingSink {
    pub calls: Arc<Mutex<Vec<SinkCall>>>,
}

impl RecordingSink {
    pub fn new() -> (Self, Arc<Mutex<Vec<SinkCall>>>) {
        let sink = Self::default();
        let calls = Arc::clone(&sink.calls);
        (sink, calls)
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn prepare(&mut self) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn publish(
        &mut self,
        status: Status,
        roster: &std::collections::BTreeSet<String>,
    ) -> Result<(), NotifyError> {
        self.calls
            .lock()
            .unwrap()
            .push(SinkCall::Publish(status, roster.iter().cloned().collect()));
        Ok(())
    }

    async fn notify(&mut self, event: &Event) -> Result<(), NotifyError> {
        let call = match event {
            Event::PlayerJoined { name } => SinkCall::Join(name.clone()),
            Event::PlayerLeft { name } => SinkCall::Leave(name.clone()),
            Event::StatusChanged { to } => SinkCall::Publish(*to, Vec::new()),
        };
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}
