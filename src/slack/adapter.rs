//! Slack side of the relay.
//!
//! Integrations target `team/channel`. Slack has no webhook to create, so
//! attach only requires the app to be a member of the invoking channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use tracing::{debug, error, info, warn};

use crate::bridge::relay::{linked_text, unlinked_text};
use crate::bridge::{Dialect, InboundMessage, IntegrationCommand, Relay, RelayAdapter, SenderTag, run_command};
use crate::bus::BusEvent;
use crate::common::error::{RelayError, RelayResult};
use crate::common::types::{ChannelIntegration, IntegrationKind};
use crate::config::SlackConfig;

use super::api::SlackApi;

const KIND: IntegrationKind = IntegrationKind::Slack;
const NOTICE_USERNAME: &str = "IKA IRC Network";

/// A `message` event from the Events API.
#[derive(Debug, Clone, Default)]
pub struct MessageEvent {
    pub team: String,
    pub channel: String,
    pub user: String,
    pub text: String,
    pub file_ids: Vec<String>,
}

/// A slash command invocation.
#[derive(Debug, Clone, Default)]
pub struct SlashCommand {
    pub command: String,
    pub team_id: String,
    pub channel_id: String,
    pub text: String,
    pub response_url: String,
}

/// Parse slash command text. `Err` carries the reply for bad input.
pub fn parse_command(command: &str, text: &str) -> Result<IntegrationCommand, String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    match words.as_slice() {
        ["attach", irc_channel] => Ok(IntegrationCommand::Attach {
            irc_channel: irc_channel.to_string(),
        }),
        ["attach", ..] => Err("Please enter an IRC channel name.".to_string()),
        ["detach"] => Ok(IntegrationCommand::Detach),
        _ => Err(format!(
            "Usage: `{0} attach #irc_channel`, `{0} detach`",
            command
        )),
    }
}

pub fn target_of(team: &str, channel: &str) -> String {
    format!("{}/{}", team, channel)
}

fn split_target(target: &str) -> RelayResult<(&str, &str)> {
    target
        .split_once('/')
        .ok_or_else(|| RelayError::platform(format!("malformed Slack target '{}'", target)))
}

pub struct SlackAdapter {
    relay: Arc<Relay>,
    api: Arc<dyn SlackApi>,
    file_proxy_base_url: String,
    post_attempts: usize,
    retry_delay: Duration,
}

impl SlackAdapter {
    pub fn new(relay: Arc<Relay>, api: Arc<dyn SlackApi>, config: &SlackConfig) -> Self {
        Self {
            relay,
            api,
            file_proxy_base_url: config.file_proxy_base_url.trim_end_matches('/').to_string(),
            post_attempts: config.post_attempts.max(1),
            retry_delay: Duration::from_millis(500),
        }
    }

    /// First delay of the outbound retry policy.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn file_url(&self, team: &str, file_id: &str) -> String {
        format!("{}/{}/{}", self.file_proxy_base_url, team, file_id)
    }

    /// Relay one Events API message.
    pub async fn receive(&self, event: MessageEvent) -> RelayResult<usize> {
        let attachments = event
            .file_ids
            .iter()
            .map(|id| self.file_url(&event.team, id))
            .collect();

        let message = InboundMessage {
            target: target_of(&event.team, &event.channel),
            author_id: event.user.clone(),
            author_name: event.user.clone(),
            text: event.text,
            mentions: HashMap::new(),
            attachments,
        };
        self.relay_inbound(message).await
    }

    /// Run a slash command and post the outcome to its `response_url`.
    pub async fn handle_command(&self, command: SlashCommand) {
        let target = target_of(&command.team_id, &command.channel_id);
        let reply = match parse_command(&command.command, &command.text) {
            Ok(parsed) => run_command(self, &target, parsed).await,
            Err(usage) => usage,
        };

        if let Err(e) = self.api.respond(&command.response_url, &reply).await {
            error!("Failed to answer {} in Slack[{}]: {}", command.command, target, e);
        }
    }

    async fn user_name(&self, team: &str, user: &str) -> String {
        match self.api.user_name(team, user).await {
            Ok(name) => name,
            Err(e) => {
                warn!("User lookup for {} in Slack[{}] failed: {}", user, team, e);
                user.to_string()
            }
        }
    }

    async fn notice(&self, integration: &ChannelIntegration, text: &str) {
        if let Err(e) = self.post(&integration.target, NOTICE_USERNAME, text).await {
            error!("Failed to post notice to Slack[{}]: {}", integration.target, e);
        }
    }

    /// Post with bounded exponential backoff.
    async fn post(&self, target: &str, username: &str, text: &str) -> RelayResult<()> {
        let (team, channel) = split_target(target)?;
        let api = &self.api;

        let post = move || async move { api.post_message(team, channel, username, text).await };

        post.retry(
            ExponentialBuilder::default()
                .with_min_delay(self.retry_delay)
                .with_max_delay(Duration::from_secs(30))
                .with_jitter()
                .with_max_times(self.post_attempts - 1),
        )
        .sleep(tokio::time::sleep)
        .when(|e| matches!(e, RelayError::PlatformCallFailed { .. }))
        .notify(|e, delay| {
            warn!(
                "Post to Slack[{}] failed: {}. Retrying in {:.1}s...",
                target,
                e,
                delay.as_secs_f64()
            );
        })
        .await
    }

    async fn deliver_chat(&self, sender: &str, recipient: &str, message: &str) -> RelayResult<()> {
        let tag = SenderTag::parse(sender);
        if tag.is_from(KIND) {
            return Ok(());
        }

        let Some(integration) = self.relay.outbound_integration(KIND, recipient).await? else {
            return Ok(());
        };
        let (team, _) = split_target(&integration.target)?;

        let members = match self.api.directory(team).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Directory lookup for Slack[{}] failed: {}", team, e);
                Vec::new()
            }
        };
        let content = self
            .relay
            .pipeline
            .specialize_outbound(Dialect::Slack, message, &members);

        info!("IRC[{}] -> Slack[{}]: {}", recipient, integration.target, content);
        self.post(&integration.target, &tag.display_name(), &content)
            .await
    }
}

#[async_trait]
impl RelayAdapter for SlackAdapter {
    fn kind(&self) -> IntegrationKind {
        KIND
    }

    async fn attach(&self, target: &str, irc_channel: &str) -> RelayResult<ChannelIntegration> {
        let (team, channel) = split_target(target)?;

        let installation = self.api.installation(team).await?;
        let members = self.api.channel_members(team, channel).await?;
        if !members.contains(&installation.bot_user_id) {
            return Err(RelayError::AppNotInstalled);
        }

        let channel = self.relay.check_attach(KIND, target, irc_channel).await?;
        let integration = self
            .relay
            .store
            .create_integration(KIND, &channel.name, target, Some(team))
            .await?;

        self.relay.announce_attach(&integration).await?;
        Ok(integration)
    }

    async fn detach(&self, target: &str) -> RelayResult<ChannelIntegration> {
        self.relay.detach(KIND, target).await
    }

    async fn relay_inbound(&self, mut message: InboundMessage) -> RelayResult<usize> {
        let Some(integration) = self.relay.inbound_integration(KIND, &message.target).await? else {
            return Ok(0);
        };
        let (team, _) = split_target(&integration.target)?;

        message.author_name = self.user_name(team, &message.author_id).await;
        for id in self.relay.pipeline.slack_mentioned_ids(&message.text) {
            let name = self.user_name(team, &id).await;
            message.mentions.insert(id, name);
        }

        self.relay
            .publish_inbound(&integration, Dialect::Slack, &message)
            .await
    }

    async fn deliver(&self, event: BusEvent) -> RelayResult<()> {
        match event {
            BusEvent::ChatMessage {
                sender,
                recipient,
                message,
            } => self.deliver_chat(&sender, &recipient, &message).await,
            BusEvent::AddIntegration { integration_id, .. } => {
                if let Some(integration) = self.relay.confirm(KIND, integration_id).await? {
                    self.notice(&integration, &linked_text(&integration.channel)).await;
                }
                Ok(())
            }
            BusEvent::RemoveIntegration { integration_id, .. } => {
                if let Some(integration) = self.relay.finalize_removal(KIND, integration_id).await? {
                    self.notice(&integration, &unlinked_text(&integration.channel)).await;
                }
                Ok(())
            }
            BusEvent::Unknown => {
                debug!("Ignoring unknown bus event");
                Ok(())
            }
        }
    }
}
