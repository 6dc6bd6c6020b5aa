use thiserror::Error;

/// Errors returned while decoding or validating wire messages.
#[derive(Debug, Error)]
pub enum WireError {
    /// JSON serialization/deserialization failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    /// A data message is missing a field the protocol requires.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}
