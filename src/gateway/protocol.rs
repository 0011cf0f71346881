//! Application gateway wire format.

use serde::{Deserialize, Serialize};

/// Frame sent by an application.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ClientMessage {
    /// `token` is `<appId>@<secretKey>`.
    Authenticate { token: String },
    Message {
        sender: String,
        target: String,
        message: String,
    },
}

/// Frame sent to an application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum ServerMessage {
    Authenticated {
        name: String,
        slug: String,
        channels: Vec<String>,
    },
    InvalidToken,
    /// A message was sent before authenticating.
    Unauthorized,
    Message {
        /// Originating application slug, or `*` for platform and IRC senders.
        origin: String,
        sender: String,
        target: String,
        message: String,
    },
    Sent,
    UnauthorizedChannel,
    /// The relay could not publish the message.
    Failed,
}

/// Body of the one-shot `POST /chat`.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub token: String,
    pub sender: String,
    pub target: String,
    pub message: String,
}
