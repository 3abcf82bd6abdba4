//! The reconciliation core.
//!
//! [`engine::ReconciliationEngine`] fuses the two observation sources into
//! one consistent status; [`scheduler::PollScheduler`] drives it at a fixed
//! period and fans the resulting events out to the notifier task.

pub mod engine;
pub mod scheduler;
pub mod state;

pub use engine::ReconciliationEngine;
pub use scheduler::{Notification, PollScheduler};
pub use state::{EngineState, Event, LogObservation, RosterSnapshot, Status};
