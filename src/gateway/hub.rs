//! Connection registry of the application gateway.
//!
//! Each socket registers an outbox and starts unauthenticated. Chat from an
//! application is published to `to-ika` and to `from-ika`, so other
//! connections see it without waiting for the IRC network. Fan-out skips the
//! connection the message came from.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, error, info};

use crate::bridge::{Origin, SenderTag};
use crate::bus::{BusEvent, BusListener, EventBus, FROM_IKA, TO_IKA};
use crate::common::error::{RelayError, RelayResult};
use crate::common::types::Application;
use crate::store::Store;

use super::protocol::{ChatRequest, ClientMessage, ServerMessage};

/// Origin id of one-shot HTTP sends.
const HTTP_ORIGIN: &str = "http";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Origin id carried in sender tags (`c<N>`).
    pub fn origin_id(&self) -> String {
        format!("c{}", self.0)
    }
}

struct Connection {
    app: Option<Application>,
    outbox: mpsc::UnboundedSender<ServerMessage>,
}

pub struct GatewayHub {
    store: Store,
    bus: EventBus,
    connections: RwLock<HashMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
}

impl GatewayHub {
    pub fn new(store: Store, bus: EventBus) -> Self {
        Self {
            store,
            bus,
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new unauthenticated connection.
    pub async fn connect(&self) -> (ConnectionId, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.connections
            .write()
            .await
            .insert(id, Connection { app: None, outbox });
        debug!("Gateway connection {} opened", id.origin_id());
        (id, inbox)
    }

    pub async fn disconnect(&self, id: ConnectionId) {
        if self.connections.write().await.remove(&id).is_some() {
            debug!("Gateway connection {} closed", id.origin_id());
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Queue a frame for one connection.
    pub async fn send_to(&self, id: ConnectionId, message: ServerMessage) {
        if let Some(connection) = self.connections.read().await.get(&id) {
            // A closed outbox means the socket is going away.
            let _ = connection.outbox.send(message);
        }
    }

    /// Resolve an `<appId>@<secretKey>` token.
    pub async fn authenticate(&self, token: &str) -> RelayResult<Application> {
        let (id, secret) = token.split_once('@').ok_or(RelayError::InvalidToken)?;
        let id: i64 = id.trim().parse().map_err(|_| RelayError::InvalidToken)?;

        self.store
            .find_application(id, secret)
            .await?
            .ok_or(RelayError::InvalidToken)
    }

    /// Tag and publish chat from an application.
    pub async fn send_message(
        &self,
        app: &Application,
        origin_id: &str,
        sender: &str,
        target: &str,
        message: &str,
    ) -> RelayResult<()> {
        if !app.can_send_to(target) {
            return Err(RelayError::UnauthorizedChannel {
                channel: target.to_string(),
            });
        }

        let tag = SenderTag::application(sender, &app.slug, origin_id).to_string();
        let event = BusEvent::chat(tag.as_str(), target, message);

        info!("App[{}] -> IRC[{}]: {}", app.slug, target, message);
        self.bus.publish(TO_IKA, &event).await?;
        self.bus.publish(FROM_IKA, &event).await?;
        Ok(())
    }

    /// Handle one frame from a socket and produce the reply.
    pub async fn handle(&self, id: ConnectionId, frame: ClientMessage) -> ServerMessage {
        match frame {
            ClientMessage::Authenticate { token } => match self.authenticate(&token).await {
                Ok(app) => {
                    info!("Gateway connection {} authenticated as {}", id.origin_id(), app.slug);
                    let reply = ServerMessage::Authenticated {
                        name: app.name.clone(),
                        slug: app.slug.clone(),
                        channels: app.sorted_channels(),
                    };
                    if let Some(connection) = self.connections.write().await.get_mut(&id) {
                        connection.app = Some(app);
                    }
                    reply
                }
                Err(RelayError::InvalidToken) => {
                    if let Some(connection) = self.connections.write().await.get_mut(&id) {
                        connection.app = None;
                    }
                    ServerMessage::InvalidToken
                }
                Err(e) => reply_for(e),
            },
            ClientMessage::Message {
                sender,
                target,
                message,
            } => {
                let app = self
                    .connections
                    .read()
                    .await
                    .get(&id)
                    .and_then(|connection| connection.app.clone());
                let Some(app) = app else {
                    return ServerMessage::Unauthorized;
                };

                match self
                    .send_message(&app, &id.origin_id(), &sender, &target, &message)
                    .await
                {
                    Ok(()) => ServerMessage::Sent,
                    Err(e) => reply_for(e),
                }
            }
        }
    }

    /// One-shot send without a connection.
    pub async fn post_chat(&self, request: ChatRequest) -> ServerMessage {
        let app = match self.authenticate(&request.token).await {
            Ok(app) => app,
            Err(e) => return reply_for(e),
        };

        match self
            .send_message(&app, HTTP_ORIGIN, &request.sender, &request.target, &request.message)
            .await
        {
            Ok(()) => ServerMessage::Sent,
            Err(e) => reply_for(e),
        }
    }

    /// Deliver a bus chat message to every authorized connection except the
    /// one it came from.
    pub async fn broadcast(&self, sender: &str, recipient: &str, message: &str) -> usize {
        let tag = SenderTag::parse(sender);
        let skip = match &tag.origin {
            Origin::Application { slug, origin_id } => Some((slug.as_str(), origin_id.as_str())),
            _ => None,
        };

        let frame = ServerMessage::Message {
            origin: tag.display_origin().to_string(),
            sender: tag.display_name(),
            target: recipient.to_string(),
            message: message.to_string(),
        };

        let connections = self.connections.read().await;
        let mut delivered = 0;
        for (id, connection) in connections.iter() {
            let Some(app) = &connection.app else {
                continue;
            };
            if !app.can_send_to(recipient) {
                continue;
            }
            if skip == Some((app.slug.as_str(), id.origin_id().as_str())) {
                continue;
            }
            if connection.outbox.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Rejections become protocol codes; faults are logged.
fn reply_for(error: RelayError) -> ServerMessage {
    match error {
        RelayError::InvalidToken => ServerMessage::InvalidToken,
        RelayError::UnauthorizedChannel { .. } => ServerMessage::UnauthorizedChannel,
        e => {
            error!("Gateway request failed: {}", e);
            ServerMessage::Failed
        }
    }
}

#[async_trait]
impl BusListener for GatewayHub {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn on_event(&self, event: BusEvent) -> RelayResult<()> {
        if let BusEvent::ChatMessage {
            sender,
            recipient,
            message,
        } = event
        {
            let delivered = self.broadcast(&sender, &recipient, &message).await;
            debug!("Delivered IRC[{}] message to {} gateway connections", recipient, delivered);
        }
        Ok(())
    }
}
