use gcm_core::{decode_inbound, AckMessage, DataMessage, Inbound, MessageType, WireError};
use gcm_transport::PushTransport;
use tracing::{debug, warn};

use crate::handlers::{DispatchOutcome, HandlerRegistry};
use crate::quota::AckSignal;
use crate::state::Outbox;

/// What happened to one inbound payload.
#[derive(Debug)]
pub enum InboundOutcome {
    /// Server ACK; one credit returned.
    Acked { message_id: Option<String> },
    /// Server NACK; one credit returned, delivery failed upstream.
    Nacked {
        message_id: Option<String>,
        error: Option<String>,
    },
    /// Device message, acknowledged and routed to a handler.
    Delivered {
        from: String,
        message_id: String,
        ack_sent: bool,
        dispatch: DispatchOutcome,
    },
    /// Control or receipt traffic the relay does not act on.
    Ignored { message_type: MessageType },
    /// Payload could not be decoded or was missing required fields.
    Malformed(WireError),
}

/// Classifies inbound payloads and applies their effects.
pub struct InboundDispatcher {
    registry: HandlerRegistry,
    outbox: Outbox,
}

impl InboundDispatcher {
    pub fn new(registry: HandlerRegistry, outbox: Outbox) -> Self {
        Self { registry, outbox }
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        &mut self.registry
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Handles one inbound `gcm` payload.
    ///
    /// ACK/NACK only return quota. Device messages are acknowledged on the
    /// transport before any handler runs, whether or not a handler exists.
    pub fn dispatch<T: PushTransport>(&self, transport: &mut T, payload: &[u8]) -> InboundOutcome {
        let inbound = match decode_inbound(payload) {
            Ok(inbound) => inbound,
            Err(err) => {
                warn!(
                    "dropping malformed inbound message ({err}): {}",
                    String::from_utf8_lossy(payload)
                );
                return InboundOutcome::Malformed(err);
            }
        };

        match inbound {
            Inbound::Ack { message_id } => {
                self.outbox.lock().quota.replenish(AckSignal::Ack);
                debug!("ack for {}", message_id.as_deref().unwrap_or("?"));
                InboundOutcome::Acked { message_id }
            }
            Inbound::Nack {
                message_id,
                error,
                description,
            } => {
                self.outbox.lock().quota.replenish(AckSignal::Nack);
                warn!(
                    "nack for {}: {} {}",
                    message_id.as_deref().unwrap_or("?"),
                    error.as_deref().unwrap_or("unknown error"),
                    description.as_deref().unwrap_or("")
                );
                InboundOutcome::Nacked { message_id, error }
            }
            Inbound::Other { message_type } => {
                debug!("ignoring {message_type:?} message");
                InboundOutcome::Ignored { message_type }
            }
            Inbound::Data(msg) => {
                let ack_sent = send_ack(transport, &msg);
                let dispatch = self.registry.dispatch(&msg.from, &msg.data, &self.outbox);
                InboundOutcome::Delivered {
                    from: msg.from,
                    message_id: msg.message_id,
                    ack_sent,
                    dispatch,
                }
            }
        }
    }
}

fn send_ack<T: PushTransport>(transport: &mut T, msg: &DataMessage) -> bool {
    let bytes = match AckMessage::for_message(msg).encode() {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("failed to encode ack for {}: {err}", msg.message_id);
            return false;
        }
    };
    match transport.send(&bytes) {
        Ok(()) => true,
        Err(err) => {
            warn!("failed to send ack for {} to {}: {err}", msg.message_id, msg.from);
            false
        }
    }
}
