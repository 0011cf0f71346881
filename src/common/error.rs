//! Error types for the application.

use thiserror::Error;

/// Errors raised by the relay core: registry, adapters and gateway.
///
/// Validation failures are turned into a plain-text rejection on the
/// originating surface (see [`RelayError::user_message`]); everything else
/// is a fault and gets logged.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("an integration of this type already owns the target or channel")]
    DuplicateIntegration,

    #[error("this platform channel already has a live integration")]
    ChannelAlreadyBound,

    #[error("unknown IRC channel: {name}")]
    UnknownChannel { name: String },

    #[error("no integration is bound to this platform channel")]
    NotBound,

    #[error("channel not authorized for this application: {channel}")]
    UnauthorizedChannel { channel: String },

    #[error("invalid application token")]
    InvalidToken,

    #[error("the relay app is not installed in this channel")]
    AppNotInstalled,

    #[error("request signature is invalid")]
    SignatureInvalid,

    #[error("request timestamp is outside the replay window")]
    ReplayWindowExceeded,

    #[error("platform call failed: {message}")]
    PlatformCallFailed { message: String },

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),

    #[error("bus error: {0}")]
    Bus(#[from] BusError),
}

impl RelayError {
    /// Shorthand for wrapping a failed external call.
    pub fn platform(message: impl ToString) -> Self {
        Self::PlatformCallFailed {
            message: message.to_string(),
        }
    }

    /// Returns true for authorization and validation failures that are
    /// reported back to the user instead of being logged as faults.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::DuplicateIntegration
                | Self::ChannelAlreadyBound
                | Self::UnknownChannel { .. }
                | Self::NotBound
                | Self::UnauthorizedChannel { .. }
                | Self::InvalidToken
                | Self::AppNotInstalled
        )
    }

    /// Plain-text message shown to a platform user.
    pub fn user_message(&self) -> String {
        match self {
            Self::DuplicateIntegration | Self::ChannelAlreadyBound => {
                "This channel already has an integration registered.".to_string()
            }
            Self::UnknownChannel { name } => {
                format!("The channel `{}` is not registered on the IKA IRC network.", name)
            }
            Self::NotBound => {
                "This channel is not linked to any IKA IRC network channel.".to_string()
            }
            Self::UnauthorizedChannel { channel } => {
                format!("You are not allowed to send to `{}`.", channel)
            }
            Self::InvalidToken => "Invalid token.".to_string(),
            Self::AppNotInstalled => "Please add the app to this channel first.".to_string(),
            _ => "Something went wrong while processing the command. Try again later.".to_string(),
        }
    }
}

/// Event bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("publish to '{channel}' timed out")]
    Timeout { channel: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unsupported bus url: {url}")]
    UnsupportedUrl { url: String },
}

impl From<redis::RedisError> for BusError {
    fn from(error: redis::RedisError) -> Self {
        Self::Transport {
            message: error.to_string(),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

/// Result type alias for relay operations.
pub type RelayResult<T> = std::result::Result<T, RelayError>;
