//! Application gateway: registered applications exchange chat with the
//! relay over a WebSocket, or send one-shot messages over HTTP.

pub mod hub;
pub mod protocol;
pub mod server;

pub use hub::GatewayHub;
