//! RCON adapter for the roster query.
//!
//! One short-lived connection per query: connect, authenticate, issue a
//! single `list` command, parse, drop. Packet framing is the standard
//! RCON layout (little-endian length prefix, id, type, NUL-terminated
//! body plus a trailing NUL), expressed as a `tokio_util` codec so the
//! exchange reads as a message stream rather than hand-rolled buffer
//! arithmetic.

use bytes::{Buf, BufMut, BytesMut};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder, Framed};
use tracing::debug;

use crate::config::RconConfig;
use crate::error::QueryError;
use crate::monitor::state::RosterSnapshot;

use super::RosterSource;

/// Request type for authentication.
const AUTH: i32 = 3;
/// Request type for command execution.
const EXEC_COMMAND: i32 = 2;

/// Packet id used for the auth request.
const AUTH_ID: i32 = 1;
/// Packet id used for the list command.
const LIST_ID: i32 = 2;

/// Upper bound on an incoming frame. RCON payloads cap out at ~4 KiB;
/// anything claiming more is a corrupt or hostile peer.
const MAX_FRAME: usize = 64 * 1024;

/// The marker substring that splits the count prefix from the name list.
const PLAYERS_ONLINE_MARKER: &str = "players online:";

/// One RCON packet, header fields decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RconPacket {
    /// Request/response correlation id. `-1` in an auth reply means the
    /// password was rejected.
    pub id: i32,
    /// Packet type (auth, command, response).
    pub kind: i32,
    /// Payload text, lossily decoded.
    pub body: String,
}

impl RconPacket {
    /// Builds an authentication request.
    #[must_use]
    pub fn auth(password: &str) -> Self {
        Self {
            id: AUTH_ID,
            kind: AUTH,
            body: password.to_string(),
        }
    }

    /// Builds a command request.
    #[must_use]
    pub fn command(text: &str) -> Self {
        Self {
            id: LIST_ID,
            kind: EXEC_COMMAND,
            body: text.to_string(),
        }
    }
}

/// Length-prefixed RCON packet codec.
#[derive(Debug, Default)]
pub struct RconCodec;

impl Encoder<RconPacket> for RconCodec {
    type Error = QueryError;

    fn encode(&mut self, packet: RconPacket, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = packet.body.as_bytes();
        // id + type + body + two NUL terminators
        let length = 4 + 4 + body.len() + 2;
        let length = i32::try_from(length)
            .map_err(|_| QueryError::MalformedResponse("outgoing packet too large".to_string()))?;
        dst.reserve(4 + length.unsigned_abs() as usize);
        dst.put_i32_le(length);
        dst.put_i32_le(packet.id);
        dst.put_i32_le(packet.kind);
        dst.put_slice(body);
        dst.put_u8(0);
        dst.put_u8(0);
        Ok(())
    }
}

impl Decoder for RconCodec {
    type Item = RconPacket;
    type Error = QueryError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            return Ok(None);
        }
        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = i32::from_le_bytes(length_bytes);

        let Ok(length) = usize::try_from(length) else {
            return Err(QueryError::MalformedResponse(format!(
                "negative frame length {length}"
            )));
        };
        if !(10..=MAX_FRAME).contains(&length) {
            return Err(QueryError::MalformedResponse(format!(
                "implausible frame length {length}"
            )));
        }
        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let id = src.get_i32_le();
        let kind = src.get_i32_le();
        let body_len = length - 10;
        let body = String::from_utf8_lossy(&src[..body_len]).into_owned();
        src.advance(body_len + 2); // body + both NUL terminators

        Ok(Some(RconPacket { id, kind, body }))
    }
}

/// Parses a `list` reply into the reported count and the roster.
///
/// Expected shape: a decimal count somewhere before the literal
/// `"players online:"`, then a comma-separated name list (possibly
/// empty). Names are trimmed; empty entries are dropped. Any shape
/// violation returns `None` — the caller treats that exactly like a
/// failed query rather than guessing a partial roster.
#[must_use]
pub fn parse_player_list(reply: &str) -> Option<(u32, RosterSnapshot)> {
    let (head, tail) = reply.split_once(PLAYERS_ONLINE_MARKER)?;
    let count = head
        .split_whitespace()
        .find_map(|word| word.parse::<u32>().ok())?;
    let names = tail
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty());
    Some((count, RosterSnapshot::from_names(names)))
}

/// The production roster source.
#[derive(Debug, Clone)]
pub struct RconRoster {
    config: RconConfig,
}

impl RconRoster {
    /// Creates a roster source; each query opens its own connection.
    #[must_use]
    pub const fn new(config: RconConfig) -> Self {
        Self { config }
    }

    async fn exchange(&self) -> Result<RosterSnapshot, QueryError> {
        let stream =
            TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        let mut framed = Framed::new(stream, RconCodec);

        framed.send(RconPacket::auth(&self.config.password)).await?;
        let reply = framed
            .next()
            .await
            .ok_or(QueryError::ConnectionClosed)??;
        if reply.id == -1 {
            return Err(QueryError::AuthRejected);
        }

        framed.send(RconPacket::command("list")).await?;
        let reply = framed
            .next()
            .await
            .ok_or(QueryError::ConnectionClosed)??;

        let (count, snapshot) = parse_player_list(&reply.body)
            .ok_or_else(|| QueryError::MalformedResponse(reply.body.clone()))?;
        debug!(
            reported = count,
            parsed = snapshot.player_names.len(),
            "roster query answered"
        );
        Ok(snapshot)
    }
}

#[async_trait::async_trait]
impl RosterSource for RconRoster {
    async fn query(&self) -> Result<RosterSnapshot, QueryError> {
        match tokio::time::timeout(self.config.timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(QueryError::Timeout {
                timeout: self.config.timeout,
            }),
        }
    }
}
