//! Discord side of the relay.
//!
//! Integrations go `pending` (webhook created, unauthorized) on attach and
//! `active` once the IRC network confirms. Outbound messages are posted
//! through the integration's webhook so they carry the sender's name.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::bridge::relay::{linked_text, unlinked_text};
use crate::bridge::{Dialect, InboundMessage, Relay, RelayAdapter, SenderTag};
use crate::bus::BusEvent;
use crate::common::error::{RelayError, RelayResult};
use crate::common::types::{ChannelIntegration, IntegrationKind};

use super::platform::DiscordPlatform;

const KIND: IntegrationKind = IntegrationKind::Discord;

pub struct DiscordAdapter {
    relay: Arc<Relay>,
    platform: Arc<dyn DiscordPlatform>,
}

impl DiscordAdapter {
    pub fn new(relay: Arc<Relay>, platform: Arc<dyn DiscordPlatform>) -> Self {
        Self { relay, platform }
    }

    async fn notice(&self, integration: &ChannelIntegration, content: &str) {
        if let Err(e) = self.platform.send_notice(&integration.target, content).await {
            error!("Failed to post notice to Discord[{}]: {}", integration.target, e);
        }
    }

    async fn deliver_chat(&self, sender: &str, recipient: &str, message: &str) -> RelayResult<()> {
        let tag = SenderTag::parse(sender);
        if tag.is_from(KIND) {
            return Ok(());
        }

        let Some(integration) = self.relay.outbound_integration(KIND, recipient).await? else {
            return Ok(());
        };
        let Some(webhook_id) = integration.extra.as_deref() else {
            warn!("Discord integration {} has no webhook", integration.id);
            return Ok(());
        };

        let members = match self.platform.channel_members(&integration.target).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Member lookup for Discord[{}] failed: {}", integration.target, e);
                Vec::new()
            }
        };
        let content = self
            .relay
            .pipeline
            .specialize_outbound(Dialect::Discord, message, &members);

        info!("IRC[{}] -> Discord[{}]: {}", recipient, integration.target, content);
        self.platform
            .execute_webhook(&integration.target, webhook_id, &tag.display_name(), &content)
            .await
    }
}

#[async_trait]
impl RelayAdapter for DiscordAdapter {
    fn kind(&self) -> IntegrationKind {
        KIND
    }

    async fn attach(&self, target: &str, irc_channel: &str) -> RelayResult<ChannelIntegration> {
        let channel = self.relay.check_attach(KIND, target, irc_channel).await?;
        let webhook_id = self.platform.create_webhook(target, &channel.name).await?;

        let integration = match self
            .relay
            .store
            .create_integration(KIND, &channel.name, target, Some(&webhook_id))
            .await
        {
            Ok(integration) => integration,
            Err(e) => {
                // Undo the webhook so the channel is left as it was.
                if let Err(cleanup) = self.platform.delete_webhook(target, &webhook_id).await {
                    error!("Failed to delete orphaned webhook {}: {}", webhook_id, cleanup);
                }
                return Err(e);
            }
        };

        self.relay.announce_attach(&integration).await?;
        Ok(integration)
    }

    async fn detach(&self, target: &str) -> RelayResult<ChannelIntegration> {
        let integration = self
            .relay
            .store
            .find_by_target(KIND, target)
            .await?
            .ok_or(RelayError::NotBound)?;

        if let Some(webhook_id) = integration.extra.as_deref() {
            if let Err(e) = self.platform.delete_webhook(target, webhook_id).await {
                warn!("Failed to delete webhook {} in Discord[{}]: {}", webhook_id, target, e);
            }
        }

        self.relay.remove_and_announce(integration).await
    }

    async fn relay_inbound(&self, message: InboundMessage) -> RelayResult<usize> {
        let Some(integration) = self.relay.inbound_integration(KIND, &message.target).await? else {
            return Ok(0);
        };

        // Our own webhook posts come back as messages authored by the webhook.
        if integration.extra.as_deref() == Some(message.author_id.as_str()) {
            debug!("Ignoring relay webhook message in Discord[{}]", message.target);
            return Ok(0);
        }

        self.relay
            .publish_inbound(&integration, Dialect::Discord, &message)
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
            BusEvent::Unknown => Ok(()),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use futures::StreamExt;
    use futures::stream::BoxStream;
    use tokio::sync::Mutex;

    use crate::bus::{EventBus, TO_IKA};
    use crate::common::types::DirectoryEntry;
    use crate::store::Store;

    #[derive(Debug, Clone, PartialEq)]
    pub enum Call {
        CreateWebhook(String),
        DeleteWebhook(String),
        Execute {
            channel: String,
            username: String,
            content: String,
        },
        Notice(String, String),
    }

    #[derive(Default)]
    pub struct FakeDiscord {
        pub calls: Mutex<Vec<Call>>,
        pub members: Vec<DirectoryEntry>,
    }

    #[async_trait]
    impl DiscordPlatform for FakeDiscord {
        async fn create_webhook(&self, channel_id: &str, _irc_channel: &str) -> RelayResult<String> {
            self.calls.lock().await.push(Call::CreateWebhook(channel_id.to_string()));
            Ok("9000".to_string())
        }

        async fn delete_webhook(&self, _channel_id: &str, webhook_id: &str) -> RelayResult<()> {
            self.calls.lock().await.push(Call::DeleteWebhook(webhook_id.to_string()));
            Ok(())
        }

        async fn channel_members(&self, _channel_id: &str) -> RelayResult<Vec<DirectoryEntry>> {
            Ok(self.members.clone())
        }

        async fn execute_webhook(
            &self,
            channel_id: &str,
            _webhook_id: &str,
            username: &str,
            content: &str,
        ) -> RelayResult<()> {
            self.calls.lock().await.push(Call::Execute {
                channel: channel_id.to_string(),
                username: username.to_string(),
                content: content.to_string(),
            });
            Ok(())
        }

        async fn send_notice(&self, channel_id: &str, content: &str) -> RelayResult<()> {
            self.calls
                .lock()
                .await
                .push(Call::Notice(channel_id.to_string(), content.to_string()));
            Ok(())
        }
    }

    async fn setup() -> (DiscordAdapter, Arc<FakeDiscord>, Arc<Relay>, BoxStream<'static, BusEvent>) {
        let store = Store::open_in_memory().unwrap();
        store.add_channel("general").await.unwrap();
        let relay = Arc::new(Relay::new(store, EventBus::memory(), "https://s.example"));
        let to_ika = relay.bus.subscribe(TO_IKA).await.unwrap();
        let platform = Arc::new(FakeDiscord {
            members: vec![DirectoryEntry::new("77", "alice")],
            ..Default::default()
        });
        let adapter = DiscordAdapter::new(relay.clone(), platform.clone());
        (adapter, platform, relay, to_ika)
    }

    async fn next_event(stream: &mut BoxStream<'static, BusEvent>) -> Option<BusEvent> {
        tokio::time::timeout(Duration::from_millis(100), stream.next())
            .await
            .ok()
            .flatten()
    }

    fn from_user(target: &str, text: &str) -> InboundMessage {
        InboundMessage {
            target: target.to_string(),
            author_id: "55".to_string(),
            author_name: "bob".to_string(),
            text: text.to_string(),
            mentions: HashMap::new(),
            attachments: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_attach_confirm_then_relay() {
        let (adapter, platform, relay, mut to_ika) = setup().await;

        let integration = adapter.attach("C1", "general").await.unwrap();
        assert!(!integration.is_authorized);
        assert_eq!(integration.extra.as_deref(), Some("9000"));
        assert_eq!(
            next_event(&mut to_ika).await,
            Some(BusEvent::AddIntegration {
                channel: "general".to_string(),
                integration_id: integration.id
            })
        );

        // Pending integrations do not relay.
        assert_eq!(adapter.relay_inbound(from_user("C1", "early")).await.unwrap(), 0);

        adapter
            .deliver(BusEvent::AddIntegration {
                channel: "general".to_string(),
                integration_id: integration.id,
            })
            .await
            .unwrap();
        let stored = relay.store.get_integration(integration.id).await.unwrap().unwrap();
        assert!(stored.is_authorized);
        assert!(platform
            .calls
            .lock()
            .await
            .contains(&Call::Notice("C1".to_string(), linked_text("general"))));

        assert_eq!(adapter.relay_inbound(from_user("C1", "hello")).await.unwrap(), 1);
        match next_event(&mut to_ika).await {
            Some(BusEvent::ChatMessage {
                recipient, message, ..
            }) => {
                assert_eq!(recipient, "general");
                assert_eq!(message, "hello");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_attach_twice_is_already_bound() {
        let (adapter, platform, _relay, _to_ika) = setup().await;
        adapter.attach("C1", "general").await.unwrap();

        let result = adapter.attach("C1", "general").await;
        assert!(matches!(result, Err(RelayError::ChannelAlreadyBound)));
        assert_eq!(
            platform
                .calls
                .lock()
                .await
                .iter()
                .filter(|c| matches!(c, Call::CreateWebhook(_)))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_attach_unknown_channel_creates_nothing() {
        let (adapter, platform, _relay, mut to_ika) = setup().await;

        let result = adapter.attach("C1", "nowhere").await;
        assert!(matches!(result, Err(RelayError::UnknownChannel { .. })));
        assert!(platform.calls.lock().await.is_empty());
        assert!(next_event(&mut to_ika).await.is_none());
    }

    #[tokio::test]
    async fn test_second_channel_to_same_irc_channel_rolls_back_webhook() {
        let (adapter, platform, _relay, _to_ika) = setup().await;
        adapter.attach("C1", "general").await.unwrap();

        let result = adapter.attach("C2", "general").await;
        assert!(matches!(result, Err(RelayError::DuplicateIntegration)));
        assert!(platform
            .calls
            .lock()
            .await
            .contains(&Call::DeleteWebhook("9000".to_string())));
    }

    #[tokio::test]
    async fn test_detach_unbound_is_not_bound_and_silent() {
        let (adapter, platform, _relay, mut to_ika) = setup().await;

        let result = adapter.detach("C404").await;
        assert!(matches!(result, Err(RelayError::NotBound)));
        assert!(platform.calls.lock().await.is_empty());
        assert!(next_event(&mut to_ika).await.is_none());
    }

    #[tokio::test]
    async fn test_detach_deletes_webhook_and_announces() {
        let (adapter, platform, relay, mut to_ika) = setup().await;
        let integration = adapter.attach("C1", "general").await.unwrap();
        next_event(&mut to_ika).await;

        adapter.detach("C1").await.unwrap();

        assert!(platform
            .calls
            .lock()
            .await
            .contains(&Call::DeleteWebhook("9000".to_string())));
        assert!(relay.store.get_integration(integration.id).await.unwrap().is_none());
        assert_eq!(
            next_event(&mut to_ika).await,
            Some(BusEvent::RemoveIntegration {
                channel: "general".to_string(),
                integration_id: integration.id
            })
        );
    }

    #[tokio::test]
    async fn test_no_self_echo_but_other_platforms_delivered() {
        let (adapter, platform, relay, _to_ika) = setup().await;
        let integration = adapter.attach("C1", "general").await.unwrap();
        relay.store.authorize_integration(integration.id).await.unwrap();

        let own = SenderTag::integration("bob", IntegrationKind::Discord, integration.id);
        adapter
            .deliver(BusEvent::chat(own.to_string(), "general", "echo"))
            .await
            .unwrap();

        let slack = SenderTag::integration("carol", IntegrationKind::Slack, 99);
        adapter
            .deliver(BusEvent::chat(slack.to_string(), "general", "alice: hi"))
            .await
            .unwrap();

        let calls = platform.calls.lock().await;
        let executed: Vec<&Call> = calls
            .iter()
            .filter(|c| matches!(c, Call::Execute { .. }))
            .collect();
        assert_eq!(
            executed,
            vec![&Call::Execute {
                channel: "C1".to_string(),
                username: "carol＠s".to_string(),
                content: "<@77> hi".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_own_webhook_author_is_dropped() {
        let (adapter, _platform, relay, mut to_ika) = setup().await;
        let integration = adapter.attach("C1", "general").await.unwrap();
        relay.store.authorize_integration(integration.id).await.unwrap();
        next_event(&mut to_ika).await;

        let mut message = from_user("C1", "relayed");
        message.author_id = "9000".to_string();
        assert_eq!(adapter.relay_inbound(message).await.unwrap(), 0);
        assert!(next_event(&mut to_ika).await.is_none());
    }

    #[tokio::test]
    async fn test_remove_from_irc_side_finalizes() {
        let (adapter, platform, relay, _to_ika) = setup().await;
        let integration = adapter.attach("C1", "general").await.unwrap();

        adapter
            .deliver(BusEvent::RemoveIntegration {
                channel: "general".to_string(),
                integration_id: integration.id,
            })
            .await
            .unwrap();

        assert!(relay.store.get_integration(integration.id).await.unwrap().is_none());
        assert!(platform
            .calls
            .lock()
            .await
            .contains(&Call::Notice("C1".to_string(), unlinked_text("general"))));
    }
}
