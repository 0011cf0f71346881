//! ika-relay - chat relay for the ika IRC network
//!
//! Bridges IRC channels with Discord channels, Slack channels and registered
//! applications over a shared event bus.

mod bridge;
mod bus;
mod common;
mod config;
mod discord;
mod gateway;
mod http;
mod slack;
mod store;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use bridge::{AdapterListener, Relay, RelayAdapter};
use bus::{EventBus, ListenerRegistry, run_dispatcher};
use config::{env::get_config_path, load_and_validate};
use discord::{DiscordAdapter, DiscordBot, SerenityPlatform};
use gateway::GatewayHub;
use slack::{SignatureVerifier, SlackAdapter, SlackState, SlackWebClient};
use store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("ika-relay v{} starting...", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = get_config_path();
    info!("Loading configuration from {}...", config_path);

    let config = load_and_validate(&config_path).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        error!("Please ensure {} exists and is properly formatted.", config_path);
        e
    })?;

    info!("Configuration loaded successfully");
    info!("  Bus: {}", config.relay.bus_url);
    info!("  Database: {}", config.relay.database_path);
    info!("  HTTP: {}", config.http.bind);
    info!("  Discord: {}", if config.discord.enabled { "enabled" } else { "disabled" });
    info!("  Slack: {}", if config.slack.enabled { "enabled" } else { "disabled" });

    // ============================================================
    // Shared core
    // ============================================================
    let store = Store::open(&config.relay.database_path)?;
    let bus = EventBus::connect(
        &config.relay.bus_url,
        Duration::from_secs(config.relay.publish_timeout_secs),
    )
    .await?;
    let relay = Arc::new(Relay::new(
        store.clone(),
        bus.clone(),
        config.relay.snippet_base_url.clone(),
    ));
    let registry = Arc::new(ListenerRegistry::new());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ============================================================
    // Adapters
    // ============================================================
    let mut discord_task = None;
    if config.discord.enabled {
        let bot = DiscordBot::build(&config.discord.token, &config.discord.command_name).await?;
        let platform = Arc::new(SerenityPlatform::new(bot.http()));
        let adapter: Arc<dyn RelayAdapter> = Arc::new(DiscordAdapter::new(relay.clone(), platform));
        registry.add(Arc::new(AdapterListener::new(adapter.clone()))).await;

        info!("Starting Discord bot...");
        let discord_shutdown_rx = shutdown_rx.clone();
        discord_task = Some(tokio::spawn(async move {
            bot.run(adapter, discord_shutdown_rx).await;
        }));
    }

    let mut slack_state = None;
    if config.slack.enabled {
        let api = Arc::new(SlackWebClient::new(store.clone())?);
        let adapter = Arc::new(SlackAdapter::new(relay.clone(), api, &config.slack));
        registry.add(Arc::new(AdapterListener::new(adapter.clone()))).await;

        slack_state = Some(SlackState {
            adapter,
            verifier: SignatureVerifier::new(
                config.slack.signing_secret.clone(),
                Duration::from_secs(config.slack.replay_window_secs),
            ),
        });
    }

    let hub = Arc::new(GatewayHub::new(store.clone(), bus.clone()));
    registry.add(hub.clone()).await;
    info!("Registered {} bus listeners", registry.len().await);

    // ============================================================
    // Dispatcher and HTTP server
    // ============================================================
    let dispatcher_task = tokio::spawn(run_dispatcher(
        bus.clone(),
        registry.clone(),
        Duration::from_millis(config.relay.poll_wait_ms),
        shutdown_rx.clone(),
    ));

    let router = http::router(slack_state, hub);
    let bind = config.http.bind.clone();
    let http_shutdown_rx = shutdown_rx.clone();
    let mut http_task = tokio::spawn(async move {
        if let Err(e) = http::serve(&bind, router, http_shutdown_rx).await {
            error!("HTTP server error: {}", e);
        }
    });

    // ============================================================
    // Run until a signal or a task exit
    // ============================================================
    let discord_exit = async {
        match discord_task.as_mut() {
            Some(task) => {
                if let Err(e) = task.await {
                    warn!("Discord task panicked: {}", e);
                }
                warn!("Discord task exited");
            }
            None => std::future::pending::<()>().await,
        }
    };

    let exited = tokio::select! {
        biased;
        _ = shutdown_signal() => {
            info!("Shutdown signal received - stopping...");
            Exited::Signal
        }
        _ = &mut http_task => {
            warn!("HTTP server exited");
            Exited::Http
        }
        _ = discord_exit => Exited::Discord,
    };

    if let Err(e) = shutdown_tx.send(true) {
        debug!("Shutdown channel closed: {}", e);
    }

    let timeout = Duration::from_secs(5);
    let stopped = async {
        if let Err(e) = dispatcher_task.await {
            warn!("Bus dispatcher panicked: {}", e);
        }
        if exited != Exited::Http {
            if let Err(e) = http_task.await {
                warn!("HTTP task panicked: {}", e);
            }
        }
        if let Some(task) = discord_task.filter(|_| exited != Exited::Discord) {
            if let Err(e) = task.await {
                warn!("Discord task panicked: {}", e);
            }
        }
    };
    if tokio::time::timeout(timeout, stopped).await.is_err() {
        warn!("Shutdown timed out after {}s", timeout.as_secs());
    }

    info!("Exiting...");
    Ok(())
}

/// What ended the main wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exited {
    Signal,
    Http,
    Discord,
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
