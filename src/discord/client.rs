//! Discord bot session.
//!
//! Serenity events are forwarded into a channel and handled by one loop, so
//! messages from a channel reach the bus in the order Discord delivers them.
//! The gateway connection is restarted with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use backon::BackoffBuilder;
use serenity::Client;
use serenity::all::{Http, HttpBuilder, Interaction, Message, MessageType, Ready};
use serenity::async_trait;
use serenity::prelude::*;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::bridge::{InboundMessage, RelayAdapter};
use crate::discord::commands;

#[derive(Debug, Clone)]
pub enum DiscordBotEvent {
    /// Bot connected and ready.
    Ready(Ready),
    /// Message received.
    Message(Message),
    /// Slash command or other interaction.
    Interaction(Interaction),
    Disconnected,
}

struct DiscordBotEvents {
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

impl DiscordBotEvents {
    fn new(discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>) -> Self {
        Self { discord_events_tx }
    }

    fn forward(&self, event: DiscordBotEvent) {
        if let Err(error) = self.discord_events_tx.send(event) {
            warn!("Failed to process discord event: {}", error);
        }
    }
}

#[async_trait]
impl EventHandler for DiscordBotEvents {
    async fn ready(&self, _context: Context, ready: Ready) {
        self.forward(DiscordBotEvent::Ready(ready));
    }

    async fn message(&self, _context: Context, message: Message) {
        self.forward(DiscordBotEvent::Message(message));
    }

    async fn interaction_create(&self, _context: Context, interaction: Interaction) {
        self.forward(DiscordBotEvent::Interaction(interaction));
    }
}

/// Create an exponential backoff iterator for Discord reconnection.
/// 5s initial, 5min max, factor 1.1, with jitter, unlimited retries.
fn discord_backoff() -> impl Iterator<Item = Duration> {
    backon::ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(5))
        .with_max_delay(Duration::from_secs(5 * 60))
        .with_factor(1.1)
        .with_jitter()
        .without_max_times()
        .build()
}

async fn build_client(
    token: &str,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
) -> anyhow::Result<Client> {
    let intents = GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_WEBHOOKS;

    // Build a custom reqwest client with timeout settings
    let reqwest_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(15))
        .connect_timeout(Duration::from_secs(10))
        .build()?;

    let http = HttpBuilder::new(token).client(reqwest_client).build();

    let events = DiscordBotEvents::new(discord_events_tx);
    let client = serenity::client::ClientBuilder::new_with_http(http, intents)
        .event_handler(events)
        .await?;
    Ok(client)
}

/// Turn a serenity message into the relay's platform-neutral form.
fn to_inbound(message: &Message) -> InboundMessage {
    let author_name = message
        .member
        .as_ref()
        .and_then(|member| member.nick.clone())
        .or_else(|| message.author.global_name.clone())
        .unwrap_or_else(|| message.author.name.clone());

    let mentions: HashMap<String, String> = message
        .mentions
        .iter()
        .map(|user| {
            let name = user
                .member
                .as_ref()
                .and_then(|member| member.nick.clone())
                .or_else(|| user.global_name.clone())
                .unwrap_or_else(|| user.name.clone());
            (user.id.to_string(), name)
        })
        .collect();

    InboundMessage {
        target: message.channel_id.get().to_string(),
        author_id: message.author.id.get().to_string(),
        author_name,
        text: message.content.clone(),
        mentions,
        attachments: message.attachments.iter().map(|a| a.url.clone()).collect(),
    }
}

pub struct DiscordBot {
    client: Option<Client>,
    http: Arc<Http>,
    token: String,
    command_name: String,
    discord_events_rx: mpsc::UnboundedReceiver<DiscordBotEvent>,
    discord_events_tx: mpsc::UnboundedSender<DiscordBotEvent>,
}

impl DiscordBot {
    /// Build the client. The session is not opened until [`DiscordBot::run`].
    pub async fn build(token: &str, command_name: &str) -> anyhow::Result<Self> {
        let (discord_events_tx, discord_events_rx) = mpsc::unbounded_channel::<DiscordBotEvent>();
        let client = build_client(token, discord_events_tx.clone()).await?;

        Ok(Self {
            http: client.http.clone(),
            client: Some(client),
            token: token.to_string(),
            command_name: command_name.to_string(),
            discord_events_rx,
            discord_events_tx,
        })
    }

    /// REST client shared with the platform implementation.
    pub fn http(&self) -> Arc<Http> {
        self.http.clone()
    }

    pub async fn run(mut self, adapter: Arc<dyn RelayAdapter>, shutdown_rx: watch::Receiver<bool>) {
        let shard_manager = self.client.as_ref().map(|c| c.shard_manager.clone());
        let mut wait_rx = shutdown_rx.clone();
        let mut events_shutdown_rx = shutdown_rx;

        tokio::select! {
            _ = Self::run_connection(&mut self.client, &self.token, &self.discord_events_tx) => {},
            _ = Self::process_events(
                &mut self.discord_events_rx,
                &self.http,
                adapter.as_ref(),
                &self.command_name,
                &mut events_shutdown_rx,
            ) => {},
            _ = async {
                loop {
                    if wait_rx.changed().await.is_err() || *wait_rx.borrow() {
                        break;
                    }
                }
                if let Some(ref manager) = shard_manager {
                    info!("Initiating graceful Discord shutdown...");
                    manager.shutdown_all().await;
                    info!("Discord shutdown complete");
                }
            } => {}
        }
        info!("Discord task ended");
    }

    async fn run_connection(
        client: &mut Option<Client>,
        token: &str,
        discord_events_tx: &mpsc::UnboundedSender<DiscordBotEvent>,
    ) {
        let mut backoff = discord_backoff();

        loop {
            info!("Connecting to Discord...");

            let mut client = match client.take() {
                Some(client) => client,
                None => match build_client(token, discord_events_tx.clone()).await {
                    Ok(client) => {
                        backoff = discord_backoff();
                        client
                    }
                    Err(e) => {
                        error!("Failed to rebuild Discord client: {}", e);
                        let delay = backoff.next().unwrap_or(Duration::from_secs(5 * 60));
                        warn!("Retrying in {:.1}s...", delay.as_secs_f64());
                        sleep(delay).await;
                        continue;
                    }
                },
            };

            match client.start().await {
                Ok(()) => {
                    info!("Discord client disconnected normally");
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    break;
                }
                Err(e) => {
                    error!("Discord client error: {}", e);
                    let delay = backoff.next().unwrap_or(Duration::from_secs(5 * 60));
                    warn!(
                        "Discord disconnected. Reconnecting in {:.1}s...",
                        delay.as_secs_f64(),
                    );
                    if let Err(error) = discord_events_tx.send(DiscordBotEvent::Disconnected) {
                        warn!("Failed to process discord event: {}", error);
                    }
                    sleep(delay).await;
                }
            }
        }
    }

    async fn process_events(
        discord_events_rx: &mut mpsc::UnboundedReceiver<DiscordBotEvent>,
        http: &Arc<Http>,
        adapter: &dyn RelayAdapter,
        command_name: &str,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) {
        let mut bot_user = None;

        loop {
            tokio::select! {
                event = discord_events_rx.recv() => {
                    let Some(event) = event else {
                        debug!("Discord events channel closed.");
                        break;
                    };

                    match event {
                        DiscordBotEvent::Ready(ready) => {
                            info!("Discord bot connected as {}", ready.user.name);
                            if let Err(e) = commands::register(http, command_name).await {
                                error!("Failed to register slash commands: {}", e);
                            }
                            bot_user = Some(ready.user.id);
                        }
                        DiscordBotEvent::Message(message) => {
                            if Some(message.author.id) == bot_user
                                || message.kind != MessageType::Regular
                                || message.guild_id.is_none()
                            {
                                continue;
                            }
                            if let Err(e) = adapter.relay_inbound(to_inbound(&message)).await {
                                error!("Failed to relay Discord[{}] message: {}", message.channel_id, e);
                            }
                        }
                        DiscordBotEvent::Interaction(Interaction::Command(command)) => {
                            commands::handle_command(http, adapter, command_name, command).await;
                        }
                        DiscordBotEvent::Interaction(_) => {}
                        DiscordBotEvent::Disconnected => {
                            bot_user = None;
                        }
                    }
                }

                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        info!("Shutdown signal received, stopping event processing");
                        break;
                    }
                }
            }
        }
    }
}
