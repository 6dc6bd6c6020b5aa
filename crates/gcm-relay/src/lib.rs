//! GCM relay runtime.
//!
//! This crate wires together the flow-controlled outbound queue, ACK-driven
//! quota accounting, inbound dispatch, and payload handlers on top of a
//! pluggable `PushTransport`.

pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod queue;
pub mod quota;
pub mod scheduler;
pub mod service;
pub mod state;

pub use config::RelayConfig;
pub use service::{Relay, RelayError, RelayStats};
pub use state::{Outbox, RelayState};
