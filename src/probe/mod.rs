//! Observation sources.
//!
//! The core consumes the two traits in this module and nothing else about
//! the transports. [`sftp::SftpProbe`] and [`rcon::RconRoster`] are the
//! production adapters; tests substitute scripted stubs.

pub mod rcon;
pub mod sftp;

use async_trait::async_trait;

use crate::error::{ConnectionError, QueryError};
use crate::monitor::state::{LogObservation, RosterSnapshot};

pub use rcon::RconRoster;
pub use sftp::SftpProbe;

/// A source of freshness observations about the remote log file.
///
/// Implementations own whatever connection state they need; `observe`
/// takes `&mut self` because the probe may reconnect, throttle, or drop
/// a broken session as a side effect of being asked.
#[async_trait]
pub trait FreshnessSource: Send {
    /// Takes one observation: modification time plus a bounded tail of
    /// the file's content.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] on any transport failure, including
    /// [`ConnectionError::Throttled`] when the reconnect cooldown has not
    /// elapsed and no I/O was attempted.
    async fn observe(&mut self) -> Result<LogObservation, ConnectionError>;

    /// Releases any held connection. Called once on shutdown.
    async fn close(&mut self);
}

/// A source of roster snapshots from the administrative query protocol.
///
/// Stateless per the contract: one short-lived exchange per call.
#[async_trait]
pub trait RosterSource: Send + Sync {
    /// Lists the currently connected players.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError`] on any connection, protocol, timeout, or
    /// parse failure. Parse failures fail closed: there is no partial
    /// success.
    async fn query(&self) -> Result<RosterSnapshot, QueryError>;
}
