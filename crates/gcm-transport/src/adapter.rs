use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

/// Coarse transport health counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportHealthSnapshot {
    pub outbound_queued: u64,
    pub outbound_send_ok: u64,
    pub outbound_send_err: u64,
    pub inbound_received: u64,
    pub inbound_dropped: u64,
    pub last_error: Option<String>,
}

/// Byte-oriented contract between the relay and a push connection server.
///
/// One transport is one authenticated session; addressing lives inside the
/// JSON payload (`to` / `from`), so there is no peer handle.
pub trait PushTransport {
    /// Transport-specific send error.
    type Error: fmt::Display;

    /// Hands one JSON payload to the connection for delivery.
    fn send(&mut self, payload: &[u8]) -> Result<(), Self::Error>;

    /// Returns the next inbound payload without blocking.
    fn recv(&mut self) -> Option<Vec<u8>>;

    /// Waits up to `timeout` for the next inbound payload.
    ///
    /// Transports without a blocking primitive fall back to `recv`.
    fn recv_timeout(&mut self, timeout: Duration) -> Option<Vec<u8>> {
        let _ = timeout;
        self.recv()
    }

    /// Whether the underlying session is still usable.
    fn is_connected(&self) -> bool {
        true
    }

    /// Best-effort health counters for logging.
    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot::default()
    }
}

/// In-memory transport for tests and local runs.
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    inbound: VecDeque<Vec<u8>>,
    outbound: Vec<Vec<u8>>,
    allow_send: bool,
    connected: bool,
    send_ok: u64,
    send_err: u64,
    recv_ok: u64,
}

impl Default for InMemoryTransport {
    fn default() -> Self {
        Self {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            allow_send: true,
            connected: true,
            send_ok: 0,
            send_err: 0,
            recv_ok: 0,
        }
    }
}

impl InMemoryTransport {
    /// Queues a payload as inbound traffic.
    pub fn enqueue_inbound(&mut self, payload: impl Into<Vec<u8>>) {
        self.inbound.push_back(payload.into());
    }

    /// Drains and returns all outbound sends captured so far.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    /// Number of inbound payloads not yet received.
    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    /// If disabled, sends fail with an error.
    pub fn set_allow_send(&mut self, allow_send: bool) {
        self.allow_send = allow_send;
    }

    /// Simulates loss of the session.
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }
}

impl PushTransport for InMemoryTransport {
    type Error = &'static str;

    fn send(&mut self, payload: &[u8]) -> Result<(), Self::Error> {
        if !self.allow_send {
            self.send_err += 1;
            return Err("send disabled");
        }
        self.outbound.push(payload.to_vec());
        self.send_ok += 1;
        Ok(())
    }

    fn recv(&mut self) -> Option<Vec<u8>> {
        let msg = self.inbound.pop_front();
        if msg.is_some() {
            self.recv_ok += 1;
        }
        msg
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn health_snapshot(&self) -> TransportHealthSnapshot {
        TransportHealthSnapshot {
            outbound_queued: self.outbound.len() as u64,
            outbound_send_ok: self.send_ok,
            outbound_send_err: self.send_err,
            inbound_received: self.recv_ok,
            inbound_dropped: 0,
            last_error: None,
        }
    }
}
