//! Embed rendering.
//!
//! Pure functions from status/event values to Discord embed JSON, kept
//! free of HTTP so the exact message shapes are unit-testable.

use std::collections::BTreeSet;
use std::time::Duration;

use serde_json::{Value, json};

use crate::monitor::state::{Event, Status};

/// Busts-in-silhouette glyph for the players field.
const PLAYERS_GLYPH: &str = "\u{1f465}";
/// Clock glyph for the footer.
const CLOCK_GLYPH: &str = "\u{1f550}";

/// Builds the pinned status embed.
///
/// Marker glyph + title, status color, a players field listing current
/// names (or a `-` placeholder), and a footer naming the poll cadence.
/// The optional hint line only appears while starting.
#[must_use]
pub fn status_embed(
    status: Status,
    roster: &BTreeSet<String>,
    poll_interval: Duration,
    starting_hint: Option<&str>,
) -> Value {
    let title = match status {
        Status::Online => format!("{}  Server is ONLINE", status.glyph()),
        Status::Starting => format!("{}  Server is STARTING UP...", status.glyph()),
        Status::Offline => format!("{}  Server is OFFLINE", status.glyph()),
    };

    let players = if roster.is_empty() {
        "-".to_string()
    } else {
        roster.iter().cloned().collect::<Vec<_>>().join(", ")
    };

    let mut embed = json!({
        "title": title,
        "color": status.color(),
        "fields": [{
            "name": format!("{PLAYERS_GLYPH} Players online ({})", roster.len()),
            "value": players,
            "inline": false,
        }],
        "footer": {
            "text": format!(
                "{CLOCK_GLYPH} Status updates every {}",
                humantime::format_duration(poll_interval)
            ),
        },
    });

    if status == Status::Starting {
        if let Some(hint) = starting_hint {
            embed["description"] = Value::String(hint.to_string());
        }
    }

    embed
}

/// Builds the standalone embed for a join/leave event.
///
/// Returns `None` for [`Event::StatusChanged`], which is rendered as a
/// pinned status replacement rather than a standalone line.
#[must_use]
pub fn event_embed(event: &Event) -> Option<Value> {
    match event {
        Event::PlayerJoined { name } => Some(json!({
            "description": format!("{}  **{name}** joined the server", Status::Online.glyph()),
            "color": Status::Online.color(),
        })),
        Event::PlayerLeft { name } => Some(json!({
            "description": format!("{}  **{name}** left the server", Status::Offline.glyph()),
            "color": Status::Offline.color(),
        })),
        Event::StatusChanged { .. } => None,
    }
}

/// Whether an embed title is one of ours: pinned status messages all
/// lead with a status marker glyph. The startup sweep uses this to
/// recognize leftovers from a prior run.
#[must_use]
pub fn is_status_title(title: &str) -> bool {
    [Status::Offline, Status::Starting, Status::Online]
        .iter()
        .any(|status| title.starts_with(status.glyph()))
}
