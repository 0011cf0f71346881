//! Capability set shared by the platform adapters.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::bus::{BusEvent, BusListener};
use crate::common::error::RelayResult;
use crate::common::types::{ChannelIntegration, IntegrationKind};

use super::relay::{attach_requested_text, unlinked_text};

/// A platform message on its way to the bus.
#[derive(Debug, Clone, Default)]
pub struct InboundMessage {
    /// Platform channel, in the same form as `ChannelIntegration::target`.
    pub target: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    /// User id -> display name for every mention in `text`.
    pub mentions: HashMap<String, String>,
    /// URLs appended as trailing lines.
    pub attachments: Vec<String>,
}

/// One external platform seen from the relay.
///
/// The bus and the registry only ever talk to adapters through this trait.
#[async_trait]
pub trait RelayAdapter: Send + Sync {
    fn kind(&self) -> IntegrationKind;

    /// Bind the platform channel `target` to an IRC channel.
    async fn attach(&self, target: &str, irc_channel: &str) -> RelayResult<ChannelIntegration>;

    /// Unbind the platform channel `target`.
    async fn detach(&self, target: &str) -> RelayResult<ChannelIntegration>;

    /// Normalize and publish a platform message. Returns the number of bus
    /// events published.
    async fn relay_inbound(&self, message: InboundMessage) -> RelayResult<usize>;

    /// Render one `from-ika` event on the platform.
    async fn deliver(&self, event: BusEvent) -> RelayResult<()>;
}

/// Registers an adapter with the bus listener registry.
pub struct AdapterListener {
    name: String,
    adapter: Arc<dyn RelayAdapter>,
}

impl AdapterListener {
    pub fn new(adapter: Arc<dyn RelayAdapter>) -> Self {
        Self {
            name: adapter.kind().to_string(),
            adapter,
        }
    }
}

#[async_trait]
impl BusListener for AdapterListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, event: BusEvent) -> RelayResult<()> {
        self.adapter.deliver(event).await
    }
}

/// Integration management command issued from a platform channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntegrationCommand {
    Attach { irc_channel: String },
    Detach,
}

/// Run a command against `adapter` and produce the reply for the user.
///
/// Rejections become their user message; faults are logged and answered
/// with a generic message.
pub async fn run_command(
    adapter: &dyn RelayAdapter,
    target: &str,
    command: IntegrationCommand,
) -> String {
    let kind = adapter.kind();
    info!("{} command in {}: {:?}", kind, target, command);

    let result = match &command {
        IntegrationCommand::Attach { irc_channel } => adapter
            .attach(target, irc_channel)
            .await
            .map(|integration| attach_requested_text(&integration.channel)),
        IntegrationCommand::Detach => adapter
            .detach(target)
            .await
            .map(|integration| unlinked_text(&integration.channel)),
    };

    match result {
        Ok(reply) => reply,
        Err(e) if e.is_user_facing() => {
            debug!("{} command in {} rejected: {}", kind, target, e);
            e.user_message()
        }
        Err(e) => {
            error!("{} command in {} failed: {}", kind, target, e);
            e.user_message()
        }
    }
}
