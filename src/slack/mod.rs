//! Slack integration: signed Events API and slash command callbacks in,
//! Web API calls out.

pub mod adapter;
pub mod api;
pub mod routes;
pub mod verify;

pub use adapter::SlackAdapter;
pub use api::SlackWebClient;
pub use routes::SlackState;
pub use verify::SignatureVerifier;
