//! HTTP surface of the application gateway: `GET /chat` upgrades to a
//! WebSocket, `POST /chat` sends one message.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use tracing::{debug, error, warn};

use super::hub::GatewayHub;
use super::protocol::{ChatRequest, ClientMessage, ServerMessage};

pub fn router(hub: Arc<GatewayHub>) -> Router {
    Router::new()
        .route("/chat", get(upgrade).post(post_chat))
        .with_state(hub)
}

async fn post_chat(
    State(hub): State<Arc<GatewayHub>>,
    Json(request): Json<ChatRequest>,
) -> Json<ServerMessage> {
    Json(hub.post_chat(request).await)
}

async fn upgrade(ws: WebSocketUpgrade, State(hub): State<Arc<GatewayHub>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<GatewayHub>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (id, mut outbox) = hub.connect().await;

    // Replies and fan-out share the outbox so frames keep their order.
    let writer = tokio::spawn(async move {
        while let Some(frame) = outbox.recv().await {
            let json = match serde_json::to_string(&frame) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize gateway frame: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("Gateway connection {} error: {}", id.origin_id(), e);
                break;
            }
        };

        let frame: ClientMessage = match serde_json::from_str(text.as_str()) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Ignoring malformed frame on {}: {}", id.origin_id(), e);
                continue;
            }
        };

        let reply = hub.handle(id, frame).await;
        hub.send_to(id, reply).await;
    }

    hub.disconnect(id).await;
    writer.abort();
}
