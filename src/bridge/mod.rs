//! Platform-independent relay core.
//!
//! ## Module Structure
//!
//! - `tag`: sender tags used for origin display and echo suppression
//! - `pipeline`: message transformation between platform markup and bus text
//! - `adapter`: the capability trait every platform adapter implements
//! - `relay`: shared context (`Relay`) used by the adapters

pub mod adapter;
pub mod pipeline;
pub mod relay;
pub mod tag;

pub use adapter::{AdapterListener, InboundMessage, IntegrationCommand, RelayAdapter, run_command};
pub use pipeline::{Dialect, MessagePipeline, Normalized};
pub use relay::Relay;
pub use tag::{Origin, SenderTag};
