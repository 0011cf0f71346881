//! Relay context shared by every adapter.
//!
//! Holds the store, the bus and the pipeline, and implements the steps that
//! are the same on every platform: publishing normalized lines, snippet
//! links, and the registry side of the integration lifecycle.

use tracing::{debug, info};

use crate::bus::{BusEvent, EventBus, TO_IKA};
use crate::common::error::{RelayError, RelayResult};
use crate::common::types::{Channel, ChannelIntegration, IntegrationKind};
use crate::store::Store;

use super::adapter::InboundMessage;
use super::pipeline::{Dialect, MessagePipeline, Normalized};
use super::tag::SenderTag;

/// Reply to a successful attach command.
pub fn attach_requested_text(channel: &str) -> String {
    format!("Requested a link with IRC channel `{}` on the IKA IRC network.", channel)
}

/// Posted once the IRC network confirms an integration.
pub fn linked_text(channel: &str) -> String {
    format!("This channel is now linked with IRC channel `{}`.", channel)
}

/// Reply to detach, and the notice for a removal requested by the IRC side.
pub fn unlinked_text(channel: &str) -> String {
    format!("This channel is no longer linked with IRC channel `{}`.", channel)
}

pub struct Relay {
    pub store: Store,
    pub bus: EventBus,
    pub pipeline: MessagePipeline,
    snippet_base_url: String,
}

impl Relay {
    pub fn new(store: Store, bus: EventBus, snippet_base_url: impl Into<String>) -> Self {
        Self {
            store,
            bus,
            pipeline: MessagePipeline::new(),
            snippet_base_url: snippet_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Store long text and return its retrieval URL.
    pub async fn snippet_url(&self, text: &str) -> RelayResult<String> {
        let id = self.store.save_snippet(text).await?;
        Ok(format!("{}/{}", self.snippet_base_url, id))
    }

    /// Normalize `message` and publish one `chat_message` per line to `to-ika`.
    pub async fn publish_inbound(
        &self,
        integration: &ChannelIntegration,
        dialect: Dialect,
        message: &InboundMessage,
    ) -> RelayResult<usize> {
        let lines = match self.pipeline.normalize_inbound(
            dialect,
            &message.text,
            &message.mentions,
            &message.attachments,
        ) {
            Normalized::Lines(lines) => lines,
            Normalized::Long(text) => vec![self.snippet_url(&text).await?],
        };

        let sender = SenderTag::integration(&message.author_name, integration.kind, integration.id)
            .to_string();

        for line in &lines {
            info!(
                "{}[{}] -> IRC[{}]: {}",
                integration.kind, integration.target, integration.channel, line
            );
            let event = BusEvent::chat(sender.as_str(), integration.channel.as_str(), line.as_str());
            self.bus.publish(TO_IKA, &event).await?;
        }

        Ok(lines.len())
    }

    /// Authorized integration a platform message may be relayed from.
    pub async fn inbound_integration(
        &self,
        kind: IntegrationKind,
        target: &str,
    ) -> RelayResult<Option<ChannelIntegration>> {
        Ok(self
            .store
            .find_by_target(kind, target)
            .await?
            .filter(|integration| integration.is_authorized))
    }

    /// Authorized integration of `kind` bound to a bus recipient.
    pub async fn outbound_integration(
        &self,
        kind: IntegrationKind,
        recipient: &str,
    ) -> RelayResult<Option<ChannelIntegration>> {
        Ok(self
            .store
            .find_by_channel(kind, recipient)
            .await?
            .filter(|integration| integration.is_authorized))
    }

    /// Checks shared by every attach: the platform channel must be free and
    /// the IRC channel must exist.
    pub async fn check_attach(
        &self,
        kind: IntegrationKind,
        target: &str,
        irc_channel: &str,
    ) -> RelayResult<Channel> {
        if self.store.find_by_target(kind, target).await?.is_some() {
            return Err(RelayError::ChannelAlreadyBound);
        }

        self.store
            .find_channel(irc_channel)
            .await?
            .ok_or_else(|| RelayError::UnknownChannel {
                name: irc_channel.to_string(),
            })
    }

    /// Announce a new pending integration to the IRC network.
    pub async fn announce_attach(&self, integration: &ChannelIntegration) -> RelayResult<()> {
        info!(
            "Requested {} integration {} for {} <-> {}",
            integration.kind, integration.id, integration.target, integration.channel
        );
        self.bus
            .publish(
                TO_IKA,
                &BusEvent::AddIntegration {
                    channel: integration.channel.clone(),
                    integration_id: integration.id,
                },
            )
            .await?;
        Ok(())
    }

    /// Remove the integration bound to `target` and announce it.
    pub async fn detach(&self, kind: IntegrationKind, target: &str) -> RelayResult<ChannelIntegration> {
        let integration = self
            .store
            .find_by_target(kind, target)
            .await?
            .ok_or(RelayError::NotBound)?;

        self.remove_and_announce(integration).await
    }

    /// Delete a known integration and publish `remove_integration`.
    pub async fn remove_and_announce(
        &self,
        integration: ChannelIntegration,
    ) -> RelayResult<ChannelIntegration> {
        let removed = self.store.remove_integration(integration.id).await?;

        info!(
            "Removed {} integration {} for {} <-> {}",
            removed.kind, removed.id, removed.target, removed.channel
        );
        self.bus
            .publish(
                TO_IKA,
                &BusEvent::RemoveIntegration {
                    channel: removed.channel.clone(),
                    integration_id: removed.id,
                },
            )
            .await?;

        Ok(removed)
    }

    /// Handle a confirmation from the IRC network. Returns the integration if
    /// it belongs to `kind` and is now authorized.
    pub async fn confirm(
        &self,
        kind: IntegrationKind,
        integration_id: i64,
    ) -> RelayResult<Option<ChannelIntegration>> {
        match self.store.get_integration(integration_id).await? {
            Some(integration) if integration.kind == kind => {
                let authorized = self.store.authorize_integration(integration_id).await?;
                if authorized.is_some() {
                    info!("Authorized {} integration {}", kind, integration_id);
                }
                Ok(authorized)
            }
            Some(_) => Ok(None),
            None => {
                debug!("Confirmation for unknown integration {}", integration_id);
                Ok(None)
            }
        }
    }

    /// Handle a removal from the IRC network. Returns the removed integration
    /// if it belonged to `kind` and still existed.
    pub async fn finalize_removal(
        &self,
        kind: IntegrationKind,
        integration_id: i64,
    ) -> RelayResult<Option<ChannelIntegration>> {
        match self.store.get_integration(integration_id).await? {
            Some(integration) if integration.kind == kind => {
                match self.store.remove_integration(integration_id).await {
                    Ok(removed) => {
                        info!("Removed {} integration {} on request", kind, integration_id);
                        Ok(Some(removed))
                    }
                    Err(RelayError::NotBound) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn relay() -> Relay {
        let store = Store::open_in_memory().unwrap();
        store.add_channel("#general").await.unwrap();
        Relay::new(store, EventBus::memory(), "https://snippets.example/")
    }

    fn message(text: &str) -> InboundMessage {
        InboundMessage {
            target: "1001".to_string(),
            author_id: "55".to_string(),
            author_name: "Alice Smith".to_string(),
            text: text.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_publish_inbound_tags_each_line() {
        let relay = relay().await;
        let integration = relay
            .store
            .create_integration(IntegrationKind::Discord, "#general", "1001", Some("w"))
            .await
            .unwrap();
        let mut to_ika = relay.bus.subscribe(TO_IKA).await.unwrap();

        let count = relay
            .publish_inbound(&integration, Dialect::Discord, &message("one\ntwo"))
            .await
            .unwrap();
        assert_eq!(count, 2);

        let sender = format!("AliceSmith＠d!integration@integrations/discord/{}", integration.id);
        assert_eq!(
            to_ika.next().await,
            Some(BusEvent::chat(sender.as_str(), "#general", "one"))
        );
        assert_eq!(
            to_ika.next().await,
            Some(BusEvent::chat(sender.as_str(), "#general", "two"))
        );
    }

    #[tokio::test]
    async fn test_long_message_becomes_snippet_link() {
        let relay = relay().await;
        let integration = relay
            .store
            .create_integration(IntegrationKind::Discord, "#general", "1001", None)
            .await
            .unwrap();
        let mut to_ika = relay.bus.subscribe(TO_IKA).await.unwrap();

        relay
            .publish_inbound(&integration, Dialect::Discord, &message("1\n2\n3\n4\n5\n6"))
            .await
            .unwrap();

        match to_ika.next().await {
            Some(BusEvent::ChatMessage { message, .. }) => {
                assert!(message.starts_with("https://snippets.example/"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirm_ignores_other_kinds() {
        let relay = relay().await;
        let integration = relay
            .store
            .create_integration(IntegrationKind::Slack, "#general", "T/C", None)
            .await
            .unwrap();

        assert!(relay
            .confirm(IntegrationKind::Discord, integration.id)
            .await
            .unwrap()
            .is_none());
        let confirmed = relay
            .confirm(IntegrationKind::Slack, integration.id)
            .await
            .unwrap()
            .unwrap();
        assert!(confirmed.is_authorized);
    }

    #[tokio::test]
    async fn test_detach_unknown_is_not_bound_and_silent() {
        let relay = relay().await;
        let mut to_ika = relay.bus.subscribe(TO_IKA).await.unwrap();

        let result = relay.detach(IntegrationKind::Discord, "404").await;
        assert!(matches!(result, Err(RelayError::NotBound)));

        let nothing = tokio::time::timeout(std::time::Duration::from_millis(50), to_ika.next()).await;
        assert!(nothing.is_err());
    }
}
