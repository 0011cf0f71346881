//! Configuration type definitions.

use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub relay: RelayConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub discord: DiscordConfig,
    #[serde(default)]
    pub slack: SlackConfig,
}

/// Core relay settings: bus, store and snippet links.
#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// `redis://host:port` or `memory://`.
    pub bus_url: String,
    pub database_path: String,
    #[serde(default = "default_snippet_base_url")]
    pub snippet_base_url: String,
    #[serde(default = "default_publish_timeout_secs")]
    pub publish_timeout_secs: u64,
    /// Upper bound for one subscriber wait cycle.
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,
}

/// HTTP listener for Slack callbacks and the application gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

/// Discord bot configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscordConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub token: String,
    /// Name of the slash-command group.
    #[serde(default = "default_command_name")]
    pub command_name: String,
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            token: String::new(),
            command_name: default_command_name(),
        }
    }
}

/// Slack app configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default = "default_file_proxy_base_url")]
    pub file_proxy_base_url: String,
    #[serde(default = "default_replay_window_secs")]
    pub replay_window_secs: u64,
    /// Attempts for one outbound post before giving up.
    #[serde(default = "default_post_attempts")]
    pub post_attempts: usize,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            signing_secret: String::new(),
            file_proxy_base_url: default_file_proxy_base_url(),
            replay_window_secs: default_replay_window_secs(),
            post_attempts: default_post_attempts(),
        }
    }
}

fn default_snippet_base_url() -> String {
    "https://api.ozinger.org/snippets".to_string()
}

fn default_file_proxy_base_url() -> String {
    "https://api.ozinger.org/slack/files".to_string()
}

fn default_publish_timeout_secs() -> u64 {
    5
}

fn default_poll_wait_ms() -> u64 {
    1000
}

fn default_bind() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_command_name() -> String {
    "ozinger".to_string()
}

fn default_replay_window_secs() -> u64 {
    60 * 5
}

fn default_post_attempts() -> usize {
    5
}
