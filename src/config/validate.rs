//! Configuration validation.
//!
//! Validates configuration values and provides helpful error messages.

use crate::common::error::ConfigError;
use crate::config::types::Config;

/// Validate a configuration and return detailed errors.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    // Relay core
    let bus_url = config.relay.bus_url.as_str();
    if !bus_url.starts_with("redis://")
        && !bus_url.starts_with("rediss://")
        && bus_url != "memory://"
    {
        errors.push(format!(
            "relay.bus_url '{}' must be a redis:// url or memory://",
            bus_url
        ));
    }
    if config.relay.database_path.is_empty() {
        errors.push("relay.database_path is required".to_string());
    }
    if config.relay.publish_timeout_secs == 0 {
        errors.push("relay.publish_timeout_secs must be non-zero".to_string());
    }
    if config.relay.poll_wait_ms == 0 {
        errors.push("relay.poll_wait_ms must be non-zero".to_string());
    }

    // Discord
    if config.discord.enabled {
        if config.discord.token.is_empty() {
            errors.push("discord.token is required when discord is enabled".to_string());
        }
        if config.discord.token == "YOUR_DISCORD_TOKEN_HERE" {
            errors.push(
                "discord.token has not been configured (still using placeholder)".to_string(),
            );
        }
        if config.discord.command_name.is_empty() {
            errors.push("discord.command_name must not be empty".to_string());
        }
    }

    // Slack
    if config.slack.enabled {
        if config.slack.signing_secret.is_empty() {
            errors.push("slack.signing_secret is required when slack is enabled".to_string());
        }
        if config.slack.post_attempts == 0 {
            errors.push("slack.post_attempts must be at least 1".to_string());
        }
        if config.slack.replay_window_secs == 0 {
            errors.push("slack.replay_window_secs must be non-zero".to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationError {
            message: errors.join("\n"),
        })
    }
}
