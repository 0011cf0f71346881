//! Discord integration.
//!
//! A bot session receives messages and slash commands; outbound messages go
//! through one webhook per bound channel.

pub mod adapter;
pub mod client;
pub mod commands;
pub mod platform;

pub use adapter::DiscordAdapter;
pub use client::DiscordBot;
pub use platform::SerenityPlatform;
