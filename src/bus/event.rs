//! Bus event envelope.
//!
//! Every payload on the bus is one JSON object tagged by its `event` field.

use serde::{Deserialize, Serialize};

/// Relay -> IRC network.
pub const TO_IKA: &str = "to-ika";

/// IRC network -> relay (and application gateway).
pub const FROM_IKA: &str = "from-ika";

/// The unit of exchange on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    ChatMessage {
        sender: String,
        recipient: String,
        message: String,
    },
    AddIntegration {
        channel: String,
        #[serde(rename = "integrationId")]
        integration_id: i64,
    },
    RemoveIntegration {
        channel: String,
        #[serde(rename = "integrationId")]
        integration_id: i64,
    },
    /// Any event name this relay does not know; consumers treat it as a no-op.
    #[serde(other)]
    Unknown,
}

impl BusEvent {
    pub fn chat(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ChatMessage {
            sender: sender.into(),
            recipient: recipient.into(),
            message: message.into(),
        }
    }

    /// Parse one wire payload.
    pub fn parse(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Encode for the wire.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_wire_format() {
        let event = BusEvent::chat("alice!a@host", "#general", "hello");
        let json: serde_json::Value = serde_json::from_str(&event.encode().unwrap()).unwrap();

        assert_eq!(json["event"], "chat_message");
        assert_eq!(json["sender"], "alice!a@host");
        assert_eq!(json["recipient"], "#general");
        assert_eq!(json["message"], "hello");
    }

    #[test]
    fn test_integration_id_is_camel_case() {
        let event = BusEvent::parse(r##"{"event":"add_integration","channel":"#a","integrationId":7}"##)
            .unwrap();
        assert_eq!(
            event,
            BusEvent::AddIntegration {
                channel: "#a".to_string(),
                integration_id: 7
            }
        );
    }

    #[test]
    fn test_unknown_event_is_noop_variant() {
        let event = BusEvent::parse(r##"{"event":"topic_changed","channel":"#a"}"##).unwrap();
        assert_eq!(event, BusEvent::Unknown);
    }

    #[test]
    fn test_malformed_payload_is_error() {
        assert!(BusEvent::parse("not json").is_err());
        assert!(BusEvent::parse(r#"{"event":"chat_message","sender":"x"}"#).is_err());
    }
}
