//! Core GCM relay primitives shared across crates.
//!
//! Includes message identifiers, the JSON wire model carried inside the
//! `gcm` element, and the wire-level error type.

pub mod error;
pub mod ids;
pub mod wire;

pub use error::WireError;
pub use ids::{random_id, MESSAGE_ID_LEN};
pub use wire::{
    decode_inbound, AckMessage, DataMessage, Inbound, InboundEnvelope, MessageType,
    OutboundMessage,
};
