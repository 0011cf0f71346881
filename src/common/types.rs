//! Shared types used across the application.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};

/// Platform family of a channel integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntegrationKind {
    Discord,
    Slack,
}

impl IntegrationKind {
    /// Value stored in the `type` column and used in sender tags.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discord => "discord",
            Self::Slack => "slack",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntegrationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "discord" => Ok(Self::Discord),
            "slack" => Ok(Self::Slack),
            other => Err(format!("unknown integration type '{}'", other)),
        }
    }
}

/// A logical IRC-side channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: i64,
    pub name: String,
}

/// Binding between one IRC channel and one platform-side channel.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelIntegration {
    pub id: i64,
    pub channel_id: i64,
    /// Name of the bound IRC channel.
    pub channel: String,
    pub kind: IntegrationKind,
    /// Discord channel id, or `team/channel` for Slack.
    pub target: String,
    /// Discord webhook id, or Slack team id.
    pub extra: Option<String>,
    pub is_authorized: bool,
    pub created_at: DateTime<Utc>,
}

/// An application allowed to use the gateway.
#[derive(Debug, Clone)]
pub struct Application {
    pub id: i64,
    pub slug: String,
    pub name: String,
    /// Authorized channel names, lowercased.
    pub channels: HashSet<String>,
}

impl Application {
    /// Case-insensitive channel authorization check.
    pub fn can_send_to(&self, channel: &str) -> bool {
        self.channels.contains(&channel.to_lowercase())
    }

    /// Authorized channels in a stable order.
    pub fn sorted_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.iter().cloned().collect();
        channels.sort();
        channels
    }
}

/// Slack workspace installation credentials.
#[derive(Debug, Clone)]
pub struct SlackInstallation {
    pub team_id: String,
    pub bot_user_id: String,
    pub access_token: String,
}

/// A platform member as seen by mention resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub id: String,
    pub display_name: String,
}

impl DirectoryEntry {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integration_kind_round_trips_through_str() {
        assert_eq!("discord".parse::<IntegrationKind>(), Ok(IntegrationKind::Discord));
        assert_eq!(IntegrationKind::Slack.to_string(), "slack");
        assert!("matrix".parse::<IntegrationKind>().is_err());
    }

    #[test]
    fn test_application_channel_check_ignores_case() {
        let app = Application {
            id: 1,
            slug: "bot".to_string(),
            name: "Bot".to_string(),
            channels: ["#general".to_string()].into_iter().collect(),
        };
        assert!(app.can_send_to("#GENERAL"));
        assert!(!app.can_send_to("#random"));
    }
}
