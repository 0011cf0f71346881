//! Slack Web API access.
//!
//! Every call is made with the bot token of the workspace it targets, looked
//! up from the stored installation.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::common::error::{RelayError, RelayResult};
use crate::common::types::{DirectoryEntry, SlackInstallation};
use crate::store::Store;

const API_BASE: &str = "https://slack.com/api";

/// Platform calls the Slack adapter needs.
#[async_trait]
pub trait SlackApi: Send + Sync {
    /// Installation for a workspace, `AppNotInstalled` if there is none.
    async fn installation(&self, team: &str) -> RelayResult<SlackInstallation>;

    /// User ids of the members of a conversation.
    async fn channel_members(&self, team: &str, channel: &str) -> RelayResult<Vec<String>>;

    /// Display name of one user.
    async fn user_name(&self, team: &str, user: &str) -> RelayResult<String>;

    /// Every active user of a workspace.
    async fn directory(&self, team: &str) -> RelayResult<Vec<DirectoryEntry>>;

    async fn post_message(
        &self,
        team: &str,
        channel: &str,
        username: &str,
        text: &str,
    ) -> RelayResult<()>;

    /// Answer a slash command through its `response_url`.
    async fn respond(&self, response_url: &str, text: &str) -> RelayResult<()>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Profile {
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    real_name: String,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    profile: Profile,
}

impl User {
    /// Display name, then real name, then handle.
    fn display_name(&self) -> String {
        [&self.profile.display_name, &self.profile.real_name, &self.name]
            .into_iter()
            .find(|name| !name.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| self.id.clone())
    }
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    user: User,
}

#[derive(Debug, Deserialize)]
struct UserList {
    #[serde(default)]
    members: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct Members {
    #[serde(default)]
    members: Vec<String>,
}

pub struct SlackWebClient {
    http: reqwest::Client,
    store: Store,
    base_url: String,
}

impl SlackWebClient {
    pub fn new(store: Store) -> RelayResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(RelayError::platform)?;

        Ok(Self {
            http,
            store,
            base_url: API_BASE.to_string(),
        })
    }

    async fn token(&self, team: &str) -> RelayResult<String> {
        Ok(self.installation(team).await?.access_token)
    }

    /// Call a Web API method with form parameters.
    async fn call<T: DeserializeOwned>(
        &self,
        team: &str,
        method: &str,
        params: &[(&str, &str)],
    ) -> RelayResult<T> {
        let token = self.token(team).await?;
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, method))
            .bearer_auth(token)
            .form(params)
            .send()
            .await
            .map_err(RelayError::platform)?;

        if !response.status().is_success() {
            return Err(RelayError::platform(format!(
                "Slack {} HTTP error: {}",
                method,
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await.map_err(RelayError::platform)?;
        check_envelope(method, &body)?;
        serde_json::from_value(body).map_err(RelayError::platform)
    }
}

fn check_envelope(method: &str, body: &serde_json::Value) -> RelayResult<()> {
    let envelope = Envelope::deserialize(body).map_err(RelayError::platform)?;
    if envelope.ok {
        return Ok(());
    }
    Err(RelayError::platform(format!(
        "Slack {} error: {}",
        method,
        envelope.error.as_deref().unwrap_or("unknown")
    )))
}

#[async_trait]
impl SlackApi for SlackWebClient {
    async fn installation(&self, team: &str) -> RelayResult<SlackInstallation> {
        self.store
            .find_slack_installation(team)
            .await?
            .ok_or(RelayError::AppNotInstalled)
    }

    async fn channel_members(&self, team: &str, channel: &str) -> RelayResult<Vec<String>> {
        let members: Members = self
            .call(team, "conversations.members", &[("channel", channel), ("limit", "1000")])
            .await?;
        Ok(members.members)
    }

    async fn user_name(&self, team: &str, user: &str) -> RelayResult<String> {
        let info: UserInfo = self.call(team, "users.info", &[("user", user)]).await?;
        Ok(info.user.display_name())
    }

    async fn directory(&self, team: &str) -> RelayResult<Vec<DirectoryEntry>> {
        let list: UserList = self.call(team, "users.list", &[("limit", "1000")]).await?;
        Ok(list
            .members
            .into_iter()
            .filter(|user| !user.deleted && !user.is_bot)
            .map(|user| DirectoryEntry::new(user.id.clone(), user.display_name()))
            .collect())
    }

    async fn post_message(
        &self,
        team: &str,
        channel: &str,
        username: &str,
        text: &str,
    ) -> RelayResult<()> {
        let _: serde_json::Value = self
            .call(
                team,
                "chat.postMessage",
                &[("channel", channel), ("username", username), ("text", text)],
            )
            .await?;
        Ok(())
    }

    async fn respond(&self, response_url: &str, text: &str) -> RelayResult<()> {
        let response = self
            .http
            .post(response_url)
            .json(&json!({ "response_type": "in_channel", "text": text }))
            .send()
            .await
            .map_err(RelayError::platform)?;

        if !response.status().is_success() {
            return Err(RelayError::platform(format!(
                "Slack response_url HTTP error: {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_error_is_reported() {
        let body = json!({ "ok": false, "error": "channel_not_found" });
        let error = check_envelope("chat.postMessage", &body).unwrap_err();
        assert!(error.to_string().contains("channel_not_found"));

        assert!(check_envelope("users.info", &json!({ "ok": true })).is_ok());
    }

    #[test]
    fn test_user_display_name_fallbacks() {
        let user: User = serde_json::from_value(json!({
            "id": "U1",
            "name": "alice.smith",
            "profile": { "display_name": "", "real_name": "Alice Smith" }
        }))
        .unwrap();
        assert_eq!(user.display_name(), "Alice Smith");

        let user: User = serde_json::from_value(json!({ "id": "U2", "name": "bob" })).unwrap();
        assert_eq!(user.display_name(), "bob");
    }

    #[tokio::test]
    async fn test_missing_installation_is_not_installed() {
        let client = SlackWebClient::new(Store::open_in_memory().unwrap()).unwrap();
        let result = client.installation("T404").await;
        assert!(matches!(result, Err(RelayError::AppNotInstalled)));
    }
}
