//! Discord REST adapter for the notification sink.
//!
//! Thin layer over the bot API: post a message, delete a message, list
//! recent channel history. The pinned status message is replaced by
//! delete-then-send (not edited) so it always sits at the bottom of the
//! channel; deletes tolerate 404 since someone may have removed the
//! message by hand.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::DiscordConfig;
use crate::error::NotifyError;
use crate::monitor::state::{Event, Status};

use super::NotificationSink;
use super::message::{event_embed, is_status_title, status_embed};

/// Public Discord API base.
const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";

/// Per-request timeout. Well under the poll period so a wedged API call
/// delays notifications, not forever.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct UserRow {
    id: String,
}

#[derive(Debug, Deserialize)]
struct EmbedRow {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    id: String,
    author: UserRow,
    #[serde(default)]
    embeds: Vec<EmbedRow>,
}

/// Whether a channel message is one of our pinned status messages.
///
/// Authored by us, and its first embed title leads with a status marker
/// glyph.
fn is_stale_status_message(message: &MessageRow, self_user_id: &str) -> bool {
    message.author.id == self_user_id
        && message
            .embeds
            .first()
            .and_then(|embed| embed.title.as_deref())
            .is_some_and(is_status_title)
}

/// The production notification sink.
pub struct DiscordSink {
    http: reqwest::Client,
    config: DiscordConfig,
    api_base: String,
    poll_interval: Duration,
    self_user_id: Option<String>,
    pinned_message_id: Option<String>,
}

impl DiscordSink {
    /// Creates a sink. No requests are made until [`prepare`] runs.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError::Http`] if the HTTP client cannot be built.
    ///
    /// [`prepare`]: NotificationSink::prepare
    pub fn new(config: DiscordConfig, poll_interval: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let api_base = config
            .api_base
            .clone()
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Ok(Self {
            http,
            config,
            api_base,
            poll_interval,
            self_user_id: None,
            pinned_message_id: None,
        })
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.config.token)
    }

    fn channel_url(&self, suffix: &str) -> String {
        format!(
            "{}/channels/{}/messages{suffix}",
            self.api_base, self.config.channel_id
        )
    }

    async fn fetch_self_user_id(&self) -> Result<String, NotifyError> {
        let endpoint = format!("{}/users/@me", self.api_base);
        let response = self
            .http
            .get(&endpoint)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status {
                code: response.status().as_u16(),
                endpoint,
            });
        }
        let user: UserRow = response
            .json()
            .await
            .map_err(|e| NotifyError::UnexpectedPayload(e.to_string()))?;
        Ok(user.id)
    }

    async fn recent_messages(&self) -> Result<Vec<MessageRow>, NotifyError> {
        let endpoint = self.channel_url(&format!(
            "?limit={}",
            self.config.history_sweep_limit
        ));
        let response = self
            .http
            .get(&endpoint)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status {
                code: response.status().as_u16(),
                endpoint,
            });
        }
        response
            .json()
            .await
            .map_err(|e| NotifyError::UnexpectedPayload(e.to_string()))
    }

    async fn post_embed(&self, embed: serde_json::Value) -> Result<String, NotifyError> {
        let endpoint = self.channel_url("");
        let response = self
            .http
            .post(&endpoint)
            .header("Authorization", self.auth_header())
            .json(&json!({ "embeds": [embed] }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(NotifyError::Status {
                code: response.status().as_u16(),
                endpoint,
            });
        }
        let message: MessageRow = response
            .json()
            .await
            .map_err(|e| NotifyError::UnexpectedPayload(e.to_string()))?;
        Ok(message.id)
    }

    /// Deletes a message, treating 404 as already gone.
    async fn delete_message(&self, message_id: &str) -> Result<(), NotifyError> {
        let endpoint = self.channel_url(&format!("/{message_id}"));
        let response = self
            .http
            .delete(&endpoint)
            .header("Authorization", self.auth_header())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 404 {
            Ok(())
        } else {
            Err(NotifyError::Status {
                code: status.as_u16(),
                endpoint,
            })
        }
    }
}

#[async_trait::async_trait]
impl NotificationSink for DiscordSink {
    /// Resolves our own user id and sweeps leftover status messages from
    /// a prior run, so at most one pinned status message exists once the
    /// first publish lands.
    async fn prepare(&mut self) -> Result<(), NotifyError> {
        let self_id = self.fetch_self_user_id().await?;
        debug!(user_id = %self_id, "resolved bot user");

        let mut swept = 0usize;
        for message in self.recent_messages().await? {
            if is_stale_status_message(&message, &self_id) {
                if let Err(err) = self.delete_message(&message.id).await {
                    warn!(message_id = %message.id, error = %err, "could not sweep old status message");
                } else {
                    swept += 1;
                }
            }
        }
        if swept > 0 {
            info!(swept, "removed leftover status messages");
        }

        self.self_user_id = Some(self_id);
        Ok(())
    }

    async fn publish(
        &mut self,
        status: Status,
        roster: &BTreeSet<String>,
    ) -> Result<(), NotifyError> {
        if let Some(old) = self.pinned_message_id.take() {
            if let Err(err) = self.delete_message(&old).await {
                warn!(message_id = %old, error = %err, "could not delete previous status message");
            }
        }
        let embed = status_embed(
            status,
            roster,
            self.poll_interval,
            self.config.starting_hint.as_deref(),
        );
        let id = self.post_embed(embed).await?;
        debug!(message_id = %id, %status, "pinned status message replaced");
        self.pinned_message_id = Some(id);
        Ok(())
    }

    async fn notify(&mut self, event: &Event) -> Result<(), NotifyError> {
        if let Some(embed) = event_embed(event) {
            self.post_embed(embed).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(author_id: &str, title: Option<&str>) -> MessageRow {
        MessageRow {
            id: "900".to_string(),
            author: UserRow {
                id: author_id.to_string(),
            },
            embeds: title
                .map(|t| {
                    vec![EmbedRow {
                        title: Some(t.to_string()),
                    }]
                })
                .unwrap_or_default(),
        }
    }

    #[test]
    fn recognizes_own_status_messages() {
        let title = format!("{}  Server is ONLINE", Status::Online.glyph());
        assert!(is_stale_status_message(&message("42", Some(&title)), "42"));
    }

    #[test]
    fn ignores_other_authors() {
        let title = format!("{}  Server is ONLINE", Status::Online.glyph());
        assert!(!is_stale_status_message(&message("99", Some(&title)), "42"));
    }

    #[test]
    fn ignores_unmarked_messages() {
        assert!(!is_stale_status_message(
            &message("42", Some("Welcome to the server")),
            "42"
        ));
        assert!(!is_stale_status_message(&message("42", None), "42"));
    }

    #[test]
    fn message_rows_deserialize_from_api_shape() {
        let raw = r#"[
            {"id": "111", "author": {"id": "42"}, "embeds": [{"title": "hello"}]},
            {"id": "222", "author": {"id": "42"}}
        ]"#;
        let rows: Vec<MessageRow> = serde_json::from_str(raw).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].embeds[0].title.as_deref(), Some("hello"));
        assert!(rows[1].embeds.is_empty());
    }
}
