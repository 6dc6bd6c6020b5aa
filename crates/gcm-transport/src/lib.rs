//! Transport abstractions for the GCM relay.
//!
//! The relay core only depends on the byte-oriented `PushTransport` trait
//! defined in this crate. Payloads are the JSON documents carried inside the
//! connection server's `gcm` element.

pub mod adapter;

pub use adapter::{InMemoryTransport, PushTransport, TransportHealthSnapshot};
