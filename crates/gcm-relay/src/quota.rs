use thiserror::Error;

/// Unacknowledged-message quota the connection server grants a session.
pub const DEFAULT_UNACKED_QUOTA: u32 = 1000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuotaError {
    #[error("unacked quota exhausted")]
    Exhausted,
}

/// Acknowledgment received for a previously sent message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckSignal {
    Ack,
    /// Delivery failed upstream. Returns the credit like an ACK, but is
    /// tracked separately so callers can tell the two apart.
    Nack,
}

/// Global credit pool for in-flight downstream messages.
///
/// Credits are not tied to specific message ids: any ACK or NACK returns one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaTracker {
    remaining: u32,
    ceiling: u32,
    clamp: bool,
    acks: u64,
    nacks: u64,
}

impl Default for QuotaTracker {
    fn default() -> Self {
        Self::new(DEFAULT_UNACKED_QUOTA)
    }
}

impl QuotaTracker {
    /// Creates a tracker with `ceiling` credits that never grows past it.
    pub fn new(ceiling: u32) -> Self {
        Self {
            remaining: ceiling,
            ceiling,
            clamp: true,
            acks: 0,
            nacks: 0,
        }
    }

    /// Disables the ceiling so spurious or duplicate ACKs grow the pool.
    pub fn unclamped(ceiling: u32) -> Self {
        Self {
            clamp: false,
            ..Self::new(ceiling)
        }
    }

    pub fn available(&self) -> bool {
        self.remaining > 0
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    pub fn acks_observed(&self) -> u64 {
        self.acks
    }

    pub fn nacks_observed(&self) -> u64 {
        self.nacks
    }

    /// Takes one credit for a message about to be sent.
    pub fn consume(&mut self) -> Result<(), QuotaError> {
        if self.remaining == 0 {
            return Err(QuotaError::Exhausted);
        }
        self.remaining -= 1;
        Ok(())
    }

    /// Returns one credit for an ACK or NACK from the server.
    pub fn replenish(&mut self, signal: AckSignal) {
        match signal {
            AckSignal::Ack => self.acks += 1,
            AckSignal::Nack => self.nacks += 1,
        }
        self.give_back();
    }

    /// Returns the credit of a message that never left the process.
    pub fn refund(&mut self) {
        self.give_back();
    }

    fn give_back(&mut self) {
        if self.clamp && self.remaining >= self.ceiling {
            return;
        }
        self.remaining = self.remaining.saturating_add(1);
    }
}
