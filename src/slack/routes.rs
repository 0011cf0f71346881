//! Slack HTTP callbacks: the Events API and the slash command.
//!
//! Both endpoints verify the request signature before looking at the body
//! and acknowledge immediately; the actual work runs on a spawned task.

use std::collections::HashMap;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, warn};

use super::adapter::{MessageEvent, SlackAdapter, SlashCommand};
use super::verify::{SIGNATURE_HEADER, SignatureVerifier, TIMESTAMP_HEADER};
use crate::common::error::{RelayError, RelayResult};

const CHANNEL_ONLY: &str = "This command can only be used in a channel.";

#[derive(Clone)]
pub struct SlackState {
    pub adapter: Arc<SlackAdapter>,
    pub verifier: SignatureVerifier,
}

pub fn router(state: SlackState) -> Router {
    Router::new()
        .route("/slack/events", post(events))
        .route("/slack/command", post(command))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Callback {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        #[serde(default)]
        team_id: Option<String>,
        event: RawEvent,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize)]
struct RawFile {
    id: String,
}

/// Plain user messages only; edits, joins and bot posts carry a subtype or
/// a `bot_id`.
fn to_message_event(team_id: Option<String>, event: RawEvent) -> Option<MessageEvent> {
    if event.kind != "message" || event.subtype.is_some() || event.bot_id.is_some() {
        return None;
    }

    Some(MessageEvent {
        team: event.team.or(team_id)?,
        channel: event.channel?,
        user: event.user?,
        text: event.text,
        file_ids: event.files.into_iter().map(|file| file.id).collect(),
    })
}

fn verify(verifier: &SignatureVerifier, headers: &HeaderMap, body: &[u8]) -> RelayResult<()> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .ok_or(RelayError::SignatureInvalid)
    };
    verifier.verify(header(TIMESTAMP_HEADER)?, header(SIGNATURE_HEADER)?, body)
}

async fn events(State(state): State<SlackState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(e) = verify(&state.verifier, &headers, &body) {
        warn!("Rejected Slack event callback: {}", e);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let callback: Callback = match serde_json::from_slice(&body) {
        Ok(callback) => callback,
        Err(e) => {
            warn!("Malformed Slack event callback: {}", e);
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    match callback {
        Callback::UrlVerification { challenge } => {
            Json(json!({ "challenge": challenge })).into_response()
        }
        Callback::EventCallback { team_id, event } => {
            if let Some(message) = to_message_event(team_id, event) {
                let adapter = state.adapter.clone();
                tokio::spawn(async move {
                    let target = format!("{}/{}", message.team, message.channel);
                    if let Err(e) = adapter.receive(message).await {
                        error!("Failed to relay Slack[{}] message: {}", target, e);
                    }
                });
            }
            Json(json!({})).into_response()
        }
        Callback::Other => Json(json!({})).into_response(),
    }
}

async fn command(State(state): State<SlackState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(e) = verify(&state.verifier, &headers, &body) {
        warn!("Rejected Slack command: {}", e);
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let form: HashMap<String, String> = url::form_urlencoded::parse(&body).into_owned().collect();
    let field = |name: &str| form.get(name).cloned().unwrap_or_default();

    let command = SlashCommand {
        command: field("command"),
        team_id: field("team_id"),
        channel_id: field("channel_id"),
        text: field("text"),
        response_url: field("response_url"),
    };

    if !(command.channel_id.starts_with('C') || command.channel_id.starts_with('G')) {
        debug!("Slack command outside a channel: {}", command.channel_id);
        return Json(json!({ "response_type": "ephemeral", "text": CHANNEL_ONLY })).into_response();
    }

    let adapter = state.adapter.clone();
    tokio::spawn(async move { adapter.handle_command(command).await });

    Json(json!({ "response_type": "in_channel" })).into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::http::HeaderValue;
    use futures::StreamExt;

    use super::*;
    use crate::bridge::Relay;
    use crate::bus::{EventBus, TO_IKA};
    use crate::common::types::IntegrationKind;
    use crate::config::SlackConfig;
    use crate::slack::adapter::tests::FakeSlack;
    use crate::store::Store;

    async fn state_with_bus() -> (SlackState, EventBus) {
        let store = Store::open_in_memory().unwrap();
        store.add_channel("#general").await.unwrap();
        let integration = store
            .create_integration(IntegrationKind::Slack, "#general", "T1/C1", Some("T1"))
            .await
            .unwrap();
        store.authorize_integration(integration.id).await.unwrap();
        let bus = EventBus::memory();
        let relay = Arc::new(Relay::new(store, bus.clone(), "https://snippets.example"));
        let adapter = SlackAdapter::new(relay, Arc::new(FakeSlack::default()), &SlackConfig::default());
        let state = SlackState {
            adapter: Arc::new(adapter),
            verifier: SignatureVerifier::new("secret", Duration::from_secs(300)),
        };
        (state, bus)
    }

    async fn state() -> SlackState {
        state_with_bus().await.0
    }

    fn signed(verifier: &SignatureVerifier, age_secs: i64, body: &str) -> HeaderMap {
        let timestamp = (chrono::Utc::now().timestamp() - age_secs).to_string();
        let signature = verifier.sign(&timestamp, body.as_bytes()).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(&timestamp).unwrap());
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(&signature).unwrap());
        headers
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_url_verification_echoes_challenge() {
        let state = state().await;
        let body = r#"{"type":"url_verification","challenge":"abc123"}"#;
        let headers = signed(&state.verifier, 0, body);

        let response = events(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "challenge": "abc123" }));
    }

    #[tokio::test]
    async fn test_stale_event_is_rejected_without_publishing() {
        let (state, bus) = state_with_bus().await;
        let mut to_ika = bus.subscribe(TO_IKA).await.unwrap();

        let body = r#"{"type":"event_callback","team_id":"T1","event":{"type":"message","channel":"C1","user":"U1","text":"hi"}}"#;
        let headers = signed(&state.verifier, 600, body);

        let response = events(State(state), headers, Bytes::from(body)).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let nothing = tokio::time::timeout(Duration::from_millis(50), to_ika.next()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test]
    async fn test_unsigned_command_is_rejected() {
        let state = state().await;
        let response = command(State(state), HeaderMap::new(), Bytes::from("text=detach")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_command_outside_channel_is_ephemeral() {
        let state = state().await;
        let body = "command=%2Fozinger&team_id=T1&channel_id=D123&text=detach&response_url=https%3A%2F%2Fhooks.example";
        let headers = signed(&state.verifier, 0, body);

        let response = command(State(state), headers, Bytes::from(body)).await;
        assert_eq!(
            body_json(response).await,
            json!({ "response_type": "ephemeral", "text": CHANNEL_ONLY })
        );
    }

    #[tokio::test]
    async fn test_command_in_channel_is_acknowledged() {
        let state = state().await;
        let body = "command=%2Fozinger&team_id=T1&channel_id=C123&text=detach&response_url=https%3A%2F%2Fhooks.example";
        let headers = signed(&state.verifier, 0, body);

        let response = command(State(state), headers, Bytes::from(body)).await;
        assert_eq!(body_json(response).await, json!({ "response_type": "in_channel" }));
    }

    #[test]
    fn test_bot_and_subtype_messages_are_ignored() {
        let parse = |value: serde_json::Value| serde_json::from_value::<RawEvent>(value).unwrap();

        let plain = parse(json!({ "type": "message", "channel": "C1", "user": "U1", "text": "hi",
            "files": [{ "id": "F1" }] }));
        let message = to_message_event(Some("T1".to_string()), plain).unwrap();
        assert_eq!(message.team, "T1");
        assert_eq!(message.file_ids, vec!["F1".to_string()]);

        let edited = parse(json!({ "type": "message", "subtype": "message_changed", "channel": "C1" }));
        assert!(to_message_event(Some("T1".to_string()), edited).is_none());

        let bot = parse(json!({ "type": "message", "bot_id": "B1", "channel": "C1", "user": "U1" }));
        assert!(to_message_event(Some("T1".to_string()), bot).is_none());
    }
}
