//! HTTP server for the Slack callbacks and the application gateway.

use std::sync::Arc;

use axum::Router;
use tokio::sync::watch;
use tracing::info;

use crate::gateway::{GatewayHub, server as gateway_server};
use crate::slack::{SlackState, routes as slack_routes};

/// Build the router. Slack routes are mounted only when Slack is enabled.
pub fn router(slack: Option<SlackState>, hub: Arc<GatewayHub>) -> Router {
    let router = gateway_server::router(hub);
    match slack {
        Some(state) => router.merge(slack_routes::router(state)),
        None => router,
    }
}

/// Serve until the shutdown signal flips.
pub async fn serve(
    bind: &str,
    router: Router,
    mut shutdown_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("HTTP server listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            loop {
                if shutdown_rx.changed().await.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        })
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
