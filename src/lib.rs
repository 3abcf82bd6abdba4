//! `craftwatch` - Minecraft server liveness monitor
//!
//! Determines the liveness of a game server it cannot introspect
//! directly, from two unreliable side channels: the freshness of its
//! log file over SFTP and the responsiveness of its RCON interface.
//! Status transitions and player churn are mirrored into a Discord
//! channel.

pub mod cli;
pub mod config;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod observability;
pub mod probe;
