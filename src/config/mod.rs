//! Configuration loading for `craftwatch`.
//!
//! The pipeline mirrors startup everywhere else in the crate: read the
//! YAML file, expand `${VAR}` references against the environment, parse,
//! then validate. Validation failures are fatal at startup; nothing in
//! here runs during steady-state operation.
//!
//! Durations are humantime strings (`"5s"`, `"40s"`, `"2m 30s"`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The remote log file watched for freshness.
    pub log_source: LogSourceConfig,
    /// The administrative roster query endpoint.
    pub rcon: RconConfig,
    /// The notification channel.
    pub discord: DiscordConfig,
    /// Polling cadence and staleness policy.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

/// SFTP endpoint and file watched by the freshness probe.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LogSourceConfig {
    /// SFTP host.
    pub host: String,
    /// SFTP port.
    #[serde(default = "default_sftp_port")]
    pub port: u16,
    /// SFTP username.
    pub username: String,
    /// Password authentication. Mutually exclusive with `key_path`.
    #[serde(default)]
    pub password: Option<String>,
    /// Private-key authentication. Mutually exclusive with `password`.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
    /// Remote path of the log file.
    pub path: PathBuf,
    /// How many trailing bytes of the file to read per observation.
    #[serde(default = "default_tail_bytes")]
    pub tail_bytes: u64,
    /// TCP + SSH handshake timeout.
    #[serde(
        default = "default_connect_timeout",
        deserialize_with = "de_duration"
    )]
    pub connect_timeout: Duration,
    /// Cooldown between connection attempts after a failed one.
    #[serde(
        default = "default_reconnect_cooldown",
        deserialize_with = "de_duration"
    )]
    pub reconnect_cooldown: Duration,
}

/// RCON endpoint used by the roster query.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RconConfig {
    /// RCON host.
    pub host: String,
    /// RCON port.
    #[serde(default = "default_rcon_port")]
    pub port: u16,
    /// RCON password.
    pub password: String,
    /// Bound on the whole connect-auth-list exchange.
    #[serde(default = "default_rcon_timeout", deserialize_with = "de_duration")]
    pub timeout: Duration,
}

/// Discord bot credentials and channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscordConfig {
    /// Bot token.
    pub token: String,
    /// Snowflake id of the destination channel.
    pub channel_id: String,
    /// Optional hint line shown on the STARTING status message.
    #[serde(default)]
    pub starting_hint: Option<String>,
    /// How many recent messages the startup sweep inspects.
    #[serde(default = "default_history_sweep_limit")]
    pub history_sweep_limit: u8,
    /// API base override, mainly for tests. Defaults to the public API.
    #[serde(default)]
    pub api_base: Option<String>,
}

/// Polling cadence and staleness policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MonitorConfig {
    /// Time between the start of one tick and the next.
    #[serde(default = "default_poll_interval", deserialize_with = "de_duration")]
    pub poll_interval: Duration,
    /// Log age beyond which the heartbeat no longer counts.
    #[serde(default = "default_stale_after", deserialize_with = "de_duration")]
    pub stale_after: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            stale_after: default_stale_after(),
        }
    }
}

const fn default_sftp_port() -> u16 {
    22
}

const fn default_rcon_port() -> u16 {
    25575
}

const fn default_tail_bytes() -> u64 {
    8192
}

const fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

const fn default_reconnect_cooldown() -> Duration {
    Duration::from_secs(15)
}

const fn default_rcon_timeout() -> Duration {
    Duration::from_secs(5)
}

const fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

const fn default_stale_after() -> Duration {
    Duration::from_secs(40)
}

const fn default_history_sweep_limit() -> u8 {
    50
}

fn de_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
}

/// Loads and validates a configuration file.
///
/// # Errors
///
/// Returns [`ConfigError`] if the file cannot be read, references an
/// unset environment variable, fails to parse, or fails validation.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let expanded = expand_env(&raw)?;
    let config: Config = serde_yaml::from_str(&expanded).map_err(|e| ConfigError::Parse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    config.validate()?;
    Ok(config)
}

/// Expands `${VAR}` references against the process environment.
///
/// Runs on the raw text before parsing, so secrets can live in the
/// environment while the file stays checked in. An unset variable is a
/// hard error; `$VAR` without braces and unterminated `${` pass through
/// verbatim.
fn expand_env(raw: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        if let Some(end) = after.find('}') {
            let var = &after[..end];
            let value = std::env::var(var).map_err(|_| ConfigError::EnvVarNotSet {
                var: var.to_string(),
            })?;
            out.push_str(&value);
            rest = &after[end + 1..];
        } else {
            out.push_str(&rest[start..]);
            rest = "";
        }
    }
    out.push_str(rest);
    Ok(out)
}

impl Config {
    /// Validates the loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found, with the dotted field
    /// path of the offending value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require(&self.log_source.host, "log_source.host")?;
        require(&self.log_source.username, "log_source.username")?;
        require(
            &self.log_source.path.display().to_string(),
            "log_source.path",
        )?;
        match (&self.log_source.password, &self.log_source.key_path) {
            (None, None) => {
                return Err(ConfigError::MissingRequired {
                    field: "log_source.password (or log_source.key_path)".to_string(),
                });
            }
            (Some(_), Some(_)) => {
                return Err(ConfigError::InvalidValue {
                    field: "log_source.password".to_string(),
                    value: "<set>".to_string(),
                    expected: "exactly one of password and key_path".to_string(),
                });
            }
            _ => {}
        }
        if self.log_source.tail_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "log_source.tail_bytes".to_string(),
                value: "0".to_string(),
                expected: "a non-zero byte count".to_string(),
            });
        }
        nonzero(self.log_source.connect_timeout, "log_source.connect_timeout")?;
        nonzero(
            self.log_source.reconnect_cooldown,
            "log_source.reconnect_cooldown",
        )?;

        require(&self.rcon.host, "rcon.host")?;
        require(&self.rcon.password, "rcon.password")?;
        nonzero(self.rcon.timeout, "rcon.timeout")?;

        require(&self.discord.token, "discord.token")?;
        require(&self.discord.channel_id, "discord.channel_id")?;
        if !self.discord.channel_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::InvalidValue {
                field: "discord.channel_id".to_string(),
                value: self.discord.channel_id.clone(),
                expected: "a numeric channel id".to_string(),
            });
        }
        if self.discord.history_sweep_limit == 0 || self.discord.history_sweep_limit > 100 {
            return Err(ConfigError::InvalidValue {
                field: "discord.history_sweep_limit".to_string(),
                value: self.discord.history_sweep_limit.to_string(),
                expected: "1..=100".to_string(),
            });
        }

        nonzero(self.monitor.poll_interval, "monitor.poll_interval")?;
        nonzero(self.monitor.stale_after, "monitor.stale_after")?;

        Ok(())
    }
}

fn require(value: &str, field: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            field: field.to_string(),
        });
    }
    Ok(())
}

fn nonzero(value: Duration, field: &str) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: "0s".to_string(),
            expected: "a non-zero duration".to_string(),
        });
    }
    Ok(())
}
