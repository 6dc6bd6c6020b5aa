use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::WireError;
use crate::ids::random_id;

/// `message_type` values carried by GCM connection-server messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Ack,
    Nack,
    Control,
    Receipt,
    #[serde(other)]
    Unknown,
}

/// Downstream message queued for delivery to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Registration token (or topic) of the target device.
    #[serde(rename = "to")]
    pub recipient: String,
    pub message_id: String,
    pub data: Value,
}

impl OutboundMessage {
    /// Builds a message with a freshly generated message id.
    pub fn new(recipient: impl Into<String>, data: Value) -> Self {
        Self {
            recipient: recipient.into(),
            message_id: random_id(),
            data,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Protocol-level acknowledgment of an upstream message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckMessage {
    pub to: String,
    pub message_type: MessageType,
    pub message_id: String,
}

impl AckMessage {
    /// Builds the ACK for an upstream message, echoing its id.
    pub fn for_message(msg: &DataMessage) -> Self {
        Self {
            to: msg.from.clone(),
            message_type: MessageType::Ack,
            message_id: msg.message_id.clone(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Raw inbound JSON object, before classification.
///
/// Every field is optional on the wire; `classify` enforces what each
/// message kind needs.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub message_type: Option<MessageType>,
    #[serde(default)]
    pub data: Option<Value>,
    /// NACK error code, e.g. `BAD_REGISTRATION`.
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Upstream application message sent by a device.
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub from: String,
    pub message_id: String,
    pub data: Value,
}

impl DataMessage {
    /// Application payload type tag (`data.type`), if present.
    pub fn payload_type(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }
}

/// Classified inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ack {
        message_id: Option<String>,
    },
    Nack {
        message_id: Option<String>,
        error: Option<String>,
        description: Option<String>,
    },
    Data(DataMessage),
    /// Control/receipt/unrecognized traffic the relay does not act on.
    Other {
        message_type: MessageType,
    },
}

impl InboundEnvelope {
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Splits the envelope into the control or data branch.
    pub fn classify(self) -> Result<Inbound, WireError> {
        match self.message_type {
            Some(MessageType::Ack) => Ok(Inbound::Ack {
                message_id: self.message_id,
            }),
            Some(MessageType::Nack) => Ok(Inbound::Nack {
                message_id: self.message_id,
                error: self.error,
                description: self.error_description,
            }),
            Some(message_type) => Ok(Inbound::Other { message_type }),
            None => Ok(Inbound::Data(DataMessage {
                from: self.from.ok_or(WireError::MissingField("from"))?,
                message_id: self.message_id.ok_or(WireError::MissingField("message_id"))?,
                // acked even without a payload; handlers see `null`
                data: self.data.unwrap_or(Value::Null),
            })),
        }
    }
}

/// Decodes and classifies one inbound `gcm` payload.
pub fn decode_inbound(bytes: &[u8]) -> Result<Inbound, WireError> {
    InboundEnvelope::decode(bytes)?.classify()
}
