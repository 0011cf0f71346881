//! Environment variable overrides for configuration.
//!
//! Supports overriding config values with environment variables:
//! - `IKA_RELAY_DISCORD_TOKEN` - Discord bot token
//! - `IKA_RELAY_SLACK_SIGNING_SECRET` - Slack request signing secret
//! - `IKA_RELAY_BUS_URL` - Event bus URL
//! - `IKA_RELAY_DATABASE_PATH` - SQLite database path
//! - `IKA_RELAY_HTTP_BIND` - HTTP listen address

use std::env;

use crate::config::types::Config;

/// Environment variable prefix for all config overrides.
const ENV_PREFIX: &str = "IKA_RELAY";

/// Apply environment variable overrides to a config.
pub fn apply_env_overrides(config: Config) -> Config {
    apply_overrides(config, |name| env::var(format!("{}_{}", ENV_PREFIX, name)).ok())
}

fn apply_overrides(mut config: Config, lookup: impl Fn(&str) -> Option<String>) -> Config {
    if let Some(token) = lookup("DISCORD_TOKEN") {
        config.discord.token = token;
    }
    if let Some(secret) = lookup("SLACK_SIGNING_SECRET") {
        config.slack.signing_secret = secret;
    }
    if let Some(url) = lookup("BUS_URL") {
        config.relay.bus_url = url;
    }
    if let Some(path) = lookup("DATABASE_PATH") {
        config.relay.database_path = path;
    }
    if let Some(bind) = lookup("HTTP_BIND") {
        config.http.bind = bind;
    }

    config
}

/// Get the config file path from environment or use default.
///
/// Checks `IKA_RELAY_CONFIG` environment variable, otherwise returns "ika-relay.conf".
pub fn get_config_path() -> String {
    env::var(format!("{}_CONFIG", ENV_PREFIX)).unwrap_or_else(|_| "ika-relay.conf".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::load_config_str;

    fn make_test_config() -> Config {
        load_config_str(
            r#"
            relay { bus_url = "memory://", database_path = "a.db" }
            discord { token = "file_token" }
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_env_prefix() {
        assert_eq!(ENV_PREFIX, "IKA_RELAY");
    }

    #[test]
    fn test_no_overrides_leaves_config_unchanged() {
        let result = apply_overrides(make_test_config(), |_| None);
        assert_eq!(result.discord.token, "file_token");
        assert_eq!(result.relay.bus_url, "memory://");
    }

    #[test]
    fn test_overrides_replace_values() {
        let result = apply_overrides(make_test_config(), |name| match name {
            "DISCORD_TOKEN" => Some("from_env".to_string()),
            "BUS_URL" => Some("redis://cache:6379".to_string()),
            _ => None,
        });
        assert_eq!(result.discord.token, "from_env");
        assert_eq!(result.relay.bus_url, "redis://cache:6379");
        assert_eq!(result.relay.database_path, "a.db");
    }
}
