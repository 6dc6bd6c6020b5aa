use std::collections::VecDeque;
use std::fmt::Display;

use gcm_core::OutboundMessage;
use serde_json::Value;
use tracing::warn;

use crate::quota::QuotaTracker;

/// Result of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Messages handed to the transport.
    pub sent: usize,
    /// Messages the transport refused; their credit was refunded.
    pub failed: usize,
}

/// FIFO buffer of downstream messages waiting for quota.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    pending: VecDeque<OutboundMessage>,
}

impl OutboundQueue {
    /// Appends a message for `recipient` and returns its generated id.
    pub fn enqueue(&mut self, recipient: impl Into<String>, data: Value) -> String {
        let msg = OutboundMessage::new(recipient, data);
        let id = msg.message_id.clone();
        self.pending.push_back(msg);
        id
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending messages in send order.
    pub fn iter(&self) -> impl Iterator<Item = &OutboundMessage> {
        self.pending.iter()
    }

    /// Sends queued messages head-first while quota remains.
    ///
    /// Each popped message costs one credit. A transmit error drops the
    /// message and refunds its credit; there is no retry.
    pub fn drain<F, E>(&mut self, quota: &mut QuotaTracker, mut transmit: F) -> DrainReport
    where
        F: FnMut(OutboundMessage) -> Result<(), E>,
        E: Display,
    {
        let mut report = DrainReport::default();
        while quota.available() {
            let Some(msg) = self.pending.pop_front() else {
                break;
            };
            if quota.consume().is_err() {
                self.pending.push_front(msg);
                break;
            }
            let message_id = msg.message_id.clone();
            let recipient = msg.recipient.clone();
            match transmit(msg) {
                Ok(()) => report.sent += 1,
                Err(err) => {
                    warn!("send of {message_id} to {recipient} failed: {err}");
                    quota.refund();
                    report.failed += 1;
                }
            }
        }
        report
    }
}
