//! SFTP adapter for the freshness source.
//!
//! Holds one lazily-established SSH session. All `ssh2` calls are
//! blocking and run on the blocking pool; the connection value is moved
//! into the closure and back out, so the session never crosses an await
//! point while borrowed.

use std::io::{Read, Seek, SeekFrom};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::LogSourceConfig;
use crate::error::ConnectionError;
use crate::monitor::state::LogObservation;

use super::FreshnessSource;

/// Reconnect throttle as an explicit deadline.
///
/// A failed connection attempt arms `retry_at`; while armed, no new
/// attempt is made. A successful connection clears it entirely, so one
/// success fully restores fast-retry behavior. Uses [`tokio::time::Instant`]
/// so tests can drive it with paused time instead of sleeping.
#[derive(Debug)]
pub struct ReconnectThrottle {
    cooldown: Duration,
    retry_at: Option<Instant>,
}

impl ReconnectThrottle {
    /// Creates an unarmed throttle with the given cooldown.
    #[must_use]
    pub const fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            retry_at: None,
        }
    }

    /// Whether a connection attempt is allowed right now.
    ///
    /// # Errors
    ///
    /// Returns the remaining wait when the cooldown has not elapsed.
    pub fn check(&self) -> Result<(), Duration> {
        match self.retry_at {
            Some(at) => {
                let now = Instant::now();
                if now < at { Err(at - now) } else { Ok(()) }
            }
            None => Ok(()),
        }
    }

    /// Arms the deadline after a failed connection attempt.
    pub fn note_failure(&mut self) {
        self.retry_at = Some(Instant::now() + self.cooldown);
    }

    /// Clears the deadline after a successful connection.
    pub fn note_success(&mut self) {
        self.retry_at = None;
    }
}

/// An established SSH session with its SFTP subsystem.
struct SftpConnection {
    session: ssh2::Session,
    sftp: ssh2::Sftp,
}

/// The production freshness probe.
pub struct SftpProbe {
    config: LogSourceConfig,
    throttle: ReconnectThrottle,
    conn: Option<SftpConnection>,
}

impl SftpProbe {
    /// Creates a disconnected probe; the first `observe` connects.
    #[must_use]
    pub fn new(config: LogSourceConfig) -> Self {
        let throttle = ReconnectThrottle::new(config.reconnect_cooldown);
        Self {
            config,
            throttle,
            conn: None,
        }
    }

    async fn ensure_connected(&mut self) -> Result<SftpConnection, ConnectionError> {
        if let Some(conn) = self.conn.take() {
            return Ok(conn);
        }
        if let Err(retry_in) = self.throttle.check() {
            debug!(retry_in_secs = retry_in.as_secs(), "reconnect throttled");
            return Err(ConnectionError::Throttled { retry_in });
        }
        let config = self.config.clone();
        let attempt = tokio::task::spawn_blocking(move || connect(&config))
            .await
            .map_err(|e| ConnectionError::TaskFailed(e.to_string()))?;
        match attempt {
            Ok(conn) => {
                info!(host = %self.config.host, port = self.config.port, "sftp connected");
                self.throttle.note_success();
                Ok(conn)
            }
            Err(err) => {
                self.throttle.note_failure();
                Err(err)
            }
        }
    }
}

#[async_trait::async_trait]
impl FreshnessSource for SftpProbe {
    async fn observe(&mut self) -> Result<LogObservation, ConnectionError> {
        let conn = self.ensure_connected().await?;

        let path = self.config.path.clone();
        let tail_bytes = self.config.tail_bytes;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = read_tail(&conn, &path, tail_bytes);
            (conn, result)
        })
        .await
        .map_err(|e| ConnectionError::TaskFailed(e.to_string()))?;

        match result {
            Ok((mtime_secs, tail_text)) => {
                self.conn = Some(conn);
                let modification_time =
                    DateTime::from_timestamp(mtime_secs, 0).unwrap_or(DateTime::UNIX_EPOCH);
                Ok(LogObservation {
                    modification_time,
                    tail_text,
                    observed_at: Utc::now(),
                })
            }
            Err(err) => {
                // Broken session: drop it and start over next tick. This
                // was an I/O failure, not a connect failure, so the
                // throttle stays unarmed.
                warn!(error = %err, "sftp read failed, dropping connection");
                drop(conn);
                Err(err)
            }
        }
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            let _ = tokio::task::spawn_blocking(move || {
                let _ = conn
                    .session
                    .disconnect(None, "craftwatch shutting down", None);
            })
            .await;
            info!("sftp connection closed");
        }
    }
}

/// Establishes the TCP connection, SSH handshake, authentication, and
/// SFTP subsystem. Blocking; call from the blocking pool.
fn connect(config: &LogSourceConfig) -> Result<SftpConnection, ConnectionError> {
    let addr = (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| ConnectionError::AddressResolution {
            host: config.host.clone(),
        })?;
    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout)?;

    let mut session = ssh2::Session::new()?;
    session.set_tcp_stream(tcp);
    session.set_timeout(
        u32::try_from(config.connect_timeout.as_millis()).unwrap_or(u32::MAX),
    );
    session.handshake()?;

    if let Some(key_path) = &config.key_path {
        session.userauth_pubkey_file(&config.username, None, key_path, None)?;
    } else {
        let password = config.password.as_deref().unwrap_or_default();
        session.userauth_password(&config.username, password)?;
    }

    let sftp = session.sftp()?;
    Ok(SftpConnection { session, sftp })
}

/// Stats the file and reads its trailing bytes. Blocking.
///
/// Returns the raw mtime in unix seconds plus the lossily decoded tail.
fn read_tail(
    conn: &SftpConnection,
    path: &Path,
    tail_bytes: u64,
) -> Result<(i64, String), ConnectionError> {
    let stat = conn.sftp.stat(path)?;
    let size = stat.size.unwrap_or(0);
    let mtime_secs = i64::try_from(stat.mtime.unwrap_or(0)).unwrap_or(0);

    let mut file = conn.sftp.open(path)?;
    if size > tail_bytes {
        file.seek(SeekFrom::Start(size - tail_bytes))?;
    }
    let mut buf = Vec::with_capacity(usize::try_from(tail_bytes).unwrap_or(8192));
    file.read_to_end(&mut buf)?;

    Ok((mtime_secs, String::from_utf8_lossy(&buf).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> LogSourceConfig {
        LogSourceConfig {
            host: "files.example.net".to_string(),
            port: 22,
            username: "panel".to_string(),
            password: Some("hunter2".to_string()),
            key_path: None,
            path: "/logs/debug.log".into(),
            tail_bytes: 8192,
            connect_timeout: Duration::from_secs(10),
            reconnect_cooldown: Duration::from_secs(15),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_blocks_until_cooldown_elapses() {
        let mut throttle = ReconnectThrottle::new(Duration::from_secs(15));
        assert!(throttle.check().is_ok());

        throttle.note_failure();
        let retry_in = throttle.check().unwrap_err();
        assert!(retry_in <= Duration::from_secs(15));

        tokio::time::advance(Duration::from_secs(14)).await;
        assert!(throttle.check().is_err());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(throttle.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn success_clears_the_deadline_entirely() {
        let mut throttle = ReconnectThrottle::new(Duration::from_secs(15));
        throttle.note_failure();
        assert!(throttle.check().is_err());

        throttle.note_success();
        assert!(throttle.check().is_ok());

        // And a later failure arms a fresh full cooldown.
        throttle.note_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(throttle.check().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_failures_push_the_deadline_out() {
        let mut throttle = ReconnectThrottle::new(Duration::from_secs(15));
        throttle.note_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        throttle.note_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        // 20s after the first failure, but only 10s after the second.
        assert!(throttle.check().is_err());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(throttle.check().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn observe_while_throttled_does_no_io() {
        let mut probe = SftpProbe::new(test_config());
        probe.throttle.note_failure();

        // No network is touched: the armed throttle short-circuits before
        // any connection attempt.
        match probe.observe().await {
            Err(ConnectionError::Throttled { retry_in }) => {
                assert!(retry_in <= Duration::from_secs(15));
            }
            other => panic!("expected Throttled, got {other:?}"),
        }
    }
}
