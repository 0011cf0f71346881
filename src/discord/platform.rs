//! Discord REST operations used by the adapter.
//!
//! The adapter only sees [`DiscordPlatform`]; [`SerenityPlatform`] is the
//! real implementation over serenity's HTTP client.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::all::{
    Channel, ChannelId, CreateAllowedMentions, CreateWebhook, ExecuteWebhook, GuildId, Http,
    UserId, WebhookId,
};
use tracing::debug;

use crate::common::error::{RelayError, RelayResult};
use crate::common::types::DirectoryEntry;

/// Name given to every webhook the relay creates.
pub const WEBHOOK_NAME: &str = "IKA IRC Network Integration";

/// Discord operations, keyed by snowflake ids in string form.
#[async_trait]
pub trait DiscordPlatform: Send + Sync {
    /// Create a webhook in `channel_id`; returns the webhook id.
    async fn create_webhook(&self, channel_id: &str, irc_channel: &str) -> RelayResult<String>;

    async fn delete_webhook(&self, channel_id: &str, webhook_id: &str) -> RelayResult<()>;

    /// Members who can see `channel_id`, with their display names.
    async fn channel_members(&self, channel_id: &str) -> RelayResult<Vec<DirectoryEntry>>;

    /// Post through the relay webhook. Only user mentions may ping.
    async fn execute_webhook(
        &self,
        channel_id: &str,
        webhook_id: &str,
        username: &str,
        content: &str,
    ) -> RelayResult<()>;

    /// Post a plain bot message.
    async fn send_notice(&self, channel_id: &str, content: &str) -> RelayResult<()>;
}

fn snowflake(id: &str) -> RelayResult<u64> {
    id.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| RelayError::platform(format!("invalid Discord id '{}'", id)))
}

pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }

    async fn guild_of(&self, channel_id: ChannelId) -> RelayResult<GuildId> {
        match channel_id.to_channel(&self.http).await.map_err(RelayError::platform)? {
            Channel::Guild(channel) => Ok(channel.guild_id),
            _ => Err(RelayError::platform(format!(
                "channel {} is not a guild channel",
                channel_id
            ))),
        }
    }
}

#[async_trait]
impl DiscordPlatform for SerenityPlatform {
    async fn create_webhook(&self, channel_id: &str, irc_channel: &str) -> RelayResult<String> {
        let channel_id = ChannelId::new(snowflake(channel_id)?);
        let reason = format!("IKA IRC Network Integration with IRC channel {}", irc_channel);

        let webhook = channel_id
            .create_webhook(&self.http, CreateWebhook::new(WEBHOOK_NAME).audit_log_reason(&reason))
            .await
            .map_err(RelayError::platform)?;

        debug!("Created webhook {} in channel {}", webhook.id, channel_id);
        Ok(webhook.id.to_string())
    }

    async fn delete_webhook(&self, _channel_id: &str, webhook_id: &str) -> RelayResult<()> {
        let webhook_id = WebhookId::new(snowflake(webhook_id)?);
        self.http
            .delete_webhook(webhook_id, Some("IKA IRC Network Integration removed"))
            .await
            .map_err(RelayError::platform)
    }

    async fn channel_members(&self, channel_id: &str) -> RelayResult<Vec<DirectoryEntry>> {
        let channel_id = ChannelId::new(snowflake(channel_id)?);
        let guild_id = self.guild_of(channel_id).await?;

        let members = guild_id
            .members(&self.http, Some(1000), None::<UserId>)
            .await
            .map_err(RelayError::platform)?;

        Ok(members
            .iter()
            .map(|member| DirectoryEntry::new(member.user.id.to_string(), member.display_name()))
            .collect())
    }

    async fn execute_webhook(
        &self,
        channel_id: &str,
        webhook_id: &str,
        username: &str,
        content: &str,
    ) -> RelayResult<()> {
        let channel_id = ChannelId::new(snowflake(channel_id)?);
        let webhook_id = WebhookId::new(snowflake(webhook_id)?);

        // Listing returns the webhook together with its token.
        let webhook = channel_id
            .webhooks(&self.http)
            .await
            .map_err(RelayError::platform)?
            .into_iter()
            .find(|webhook| webhook.id == webhook_id)
            .ok_or_else(|| {
                RelayError::platform(format!("webhook {} not found in {}", webhook_id, channel_id))
            })?;

        let mentions = CreateAllowedMentions::new()
            .all_users(true)
            .everyone(false)
            .all_roles(false)
            .replied_user(false);

        let builder = ExecuteWebhook::new()
            .content(content)
            .username(username)
            .allowed_mentions(mentions);

        webhook
            .execute(&self.http, false, builder)
            .await
            .map_err(RelayError::platform)?;
        Ok(())
    }

    async fn send_notice(&self, channel_id: &str, content: &str) -> RelayResult<()> {
        ChannelId::new(snowflake(channel_id)?)
            .say(&self.http, content)
            .await
            .map_err(RelayError::platform)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_parsing() {
        assert_eq!(snowflake("1234").unwrap(), 1234);
        assert!(snowflake("0").is_err());
        assert!(snowflake("T1/C1").is_err());
    }
}
