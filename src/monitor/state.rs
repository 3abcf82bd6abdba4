//! Status, observations, and engine-owned state.
//!
//! Plain owned values. The engine mutates [`EngineState`] inside its tick
//! and nothing else touches it; there is deliberately no shared-state
//! wrapper anywhere in this module.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Liveness status of the monitored server.
///
/// Exactly one value is current at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    /// No recent log activity; the server process is presumed dead.
    Offline,
    /// The log is moving but the query protocol is not answering yet.
    Starting,
    /// The query protocol answers; the roster is authoritative.
    Online,
}

impl Status {
    /// Status marker glyph used as the visual prefix on pinned status
    /// messages. Also how leftover messages from a prior run are
    /// recognized during the startup sweep.
    #[must_use]
    pub const fn glyph(self) -> &'static str {
        match self {
            Self::Offline => "\u{1f534}",  // red circle
            Self::Starting => "\u{1f7e1}", // yellow circle
            Self::Online => "\u{1f7e2}",   // green circle
        }
    }

    /// Embed accent color for this status.
    #[must_use]
    pub const fn color(self) -> u32 {
        match self {
            Self::Offline => 0x00E7_4C3C,
            Self::Starting => 0x00F3_9C12,
            Self::Online => 0x002E_CC71,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Offline => "OFFLINE",
            Self::Starting => "STARTING",
            Self::Online => "ONLINE",
        };
        write!(f, "{s}")
    }
}

/// One successful look at the remote log file.
///
/// Produced at most once per tick by the freshness probe; immutable.
#[derive(Debug, Clone)]
pub struct LogObservation {
    /// Last-modified time reported by the remote file system.
    pub modification_time: DateTime<Utc>,
    /// Trailing bytes of the file, lossily decoded. Bounded by the
    /// configured tail size, large enough to contain a shutdown marker.
    pub tail_text: String,
    /// When the probe took this observation.
    pub observed_at: DateTime<Utc>,
}

impl LogObservation {
    /// Age of the log at observation time.
    ///
    /// Saturates at zero when the remote clock is ahead of ours.
    #[must_use]
    pub fn age(&self) -> Duration {
        (self.observed_at - self.modification_time)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

/// The set of player names a successful roster query returned.
///
/// Absence of a snapshot (query failure) is distinct from an empty set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RosterSnapshot {
    /// Connected player names, deterministically ordered.
    pub player_names: BTreeSet<String>,
}

impl RosterSnapshot {
    /// Builds a snapshot from any iterable of names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            player_names: names.into_iter().map(Into::into).collect(),
        }
    }
}

/// State owned exclusively by the reconciliation engine.
///
/// Invariant: `current_roster` is non-empty only when `status` is
/// [`Status::Online`].
#[derive(Debug, Clone)]
pub struct EngineState {
    /// Current fused status.
    pub status: Status,
    /// Modification time recorded on the last tick that produced a
    /// successful observation. Updated even on ticks with no transition.
    pub last_seen_modification_time: Option<DateTime<Utc>>,
    /// Players currently believed connected.
    pub current_roster: BTreeSet<String>,
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            status: Status::Offline,
            last_seen_modification_time: None,
            current_roster: BTreeSet::new(),
        }
    }
}

/// Output of one tick, in notification order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The fused status changed, or the roster churned while online and
    /// the pinned display needs a refresh.
    StatusChanged {
        /// The status to display.
        to: Status,
    },
    /// A player appeared in the roster.
    PlayerJoined {
        /// The player's name as reported by the roster query.
        name: String,
    },
    /// A player disappeared from the roster.
    PlayerLeft {
        /// The player's name as last seen in the roster.
        name: String,
    },
}
