use std::sync::atomic::{AtomicBool, Ordering};

use gcm_transport::PushTransport;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RelayConfig;
use crate::dispatch::{InboundDispatcher, InboundOutcome};
use crate::handlers::{DispatchOutcome, HandlerRegistry};
use crate::queue::DrainReport;
use crate::scheduler::DelayScheduler;
use crate::state::{Outbox, RelayState};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("transport disconnected")]
    Disconnected,
}

/// Running totals kept by the relay loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Inbound payloads taken from the transport.
    pub inbound_messages: usize,
    /// Device messages acknowledged and routed.
    pub data_messages: usize,
    /// Server ACKs observed.
    pub ack_messages: usize,
    /// Server NACKs observed.
    pub nack_messages: usize,
    /// Control/receipt traffic skipped.
    pub ignored_messages: usize,
    /// Payloads that failed to decode or validate.
    pub malformed_messages: usize,
    /// Device payloads with no matching handler.
    pub unhandled_payloads: usize,
    /// Protocol ACKs handed to the transport.
    pub protocol_acks_sent: usize,
    /// Protocol ACKs the transport refused.
    pub protocol_ack_failures: usize,
    /// Queued messages handed to the transport.
    pub sent_messages: usize,
    /// Queued messages the transport refused.
    pub send_failures: usize,
}

/// Work done by one loop iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub inbound: usize,
    pub drain: DrainReport,
}

/// Relay service owning the transport, dispatcher, and shared state.
pub struct Relay<T: PushTransport> {
    pub transport: T,
    pub stats: RelayStats,
    config: RelayConfig,
    dispatcher: InboundDispatcher,
}

impl<T: PushTransport> Relay<T> {
    /// Builds a relay with the built-in `ping`/`delay` handlers.
    pub fn new(transport: T, config: RelayConfig, scheduler: DelayScheduler) -> Self {
        let registry = HandlerRegistry::with_builtin(scheduler, config.reply_delay);
        let outbox = Outbox::new(RelayState::new(config.quota_tracker()));
        Self::with_registry(transport, config, registry, outbox)
    }

    pub fn with_registry(
        transport: T,
        config: RelayConfig,
        registry: HandlerRegistry,
        outbox: Outbox,
    ) -> Self {
        Self {
            transport,
            config,
            stats: RelayStats::default(),
            dispatcher: InboundDispatcher::new(registry, outbox),
        }
    }

    /// Settings the relay was built with. Quota and reply delay are fixed
    /// at construction.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle for queuing downstream messages from outside the loop.
    pub fn outbox(&self) -> Outbox {
        self.dispatcher.outbox().clone()
    }

    pub fn registry_mut(&mut self) -> &mut HandlerRegistry {
        self.dispatcher.registry_mut()
    }

    /// One loop iteration: process one inbound batch, then drain the queue.
    ///
    /// Waits at most `process_timeout` for the first inbound payload and
    /// then takes whatever is immediately available, up to
    /// `max_inbound_batch`.
    pub fn tick(&mut self) -> Result<TickReport, RelayError> {
        if !self.transport.is_connected() {
            return Err(RelayError::Disconnected);
        }

        let mut inbound = 0usize;
        let batch = self.config.max_inbound_batch.max(1);
        if let Some(first) = self.transport.recv_timeout(self.config.process_timeout) {
            self.handle_inbound(&first);
            inbound += 1;
            while inbound < batch {
                let Some(next) = self.transport.recv() else {
                    break;
                };
                self.handle_inbound(&next);
                inbound += 1;
            }
        }

        let drain = self.flush();
        if inbound > 0 || drain.sent > 0 || drain.failed > 0 {
            debug!(
                "tick: inbound={inbound} sent={} failed={}",
                drain.sent, drain.failed
            );
        }
        Ok(TickReport { inbound, drain })
    }

    /// Sends queued messages while quota remains.
    pub fn flush(&mut self) -> DrainReport {
        let transport = &mut self.transport;
        let report = {
            let mut guard = self.dispatcher.outbox().lock();
            let RelayState { queue, quota } = &mut *guard;
            queue.drain(quota, |msg| {
                let bytes = msg.encode().map_err(|err| err.to_string())?;
                transport.send(&bytes).map_err(|err| err.to_string())
            })
        };
        self.stats.sent_messages += report.sent;
        self.stats.send_failures += report.failed;
        report
    }

    /// Ticks until `shutdown` is raised or the transport disconnects.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<(), RelayError> {
        info!("relay loop started");
        while !shutdown.load(Ordering::Relaxed) {
            self.tick()?;
        }
        info!("relay loop stopped: {:?}", self.stats);
        Ok(())
    }

    fn handle_inbound(&mut self, payload: &[u8]) {
        self.stats.inbound_messages += 1;
        match self.dispatcher.dispatch(&mut self.transport, payload) {
            InboundOutcome::Acked { .. } => self.stats.ack_messages += 1,
            InboundOutcome::Nacked { .. } => self.stats.nack_messages += 1,
            InboundOutcome::Ignored { .. } => self.stats.ignored_messages += 1,
            InboundOutcome::Malformed(_) => self.stats.malformed_messages += 1,
            InboundOutcome::Delivered {
                ack_sent, dispatch, ..
            } => {
                self.stats.data_messages += 1;
                if ack_sent {
                    self.stats.protocol_acks_sent += 1;
                } else {
                    self.stats.protocol_ack_failures += 1;
                }
                if !matches!(dispatch, DispatchOutcome::Handled { .. }) {
                    self.stats.unhandled_payloads += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;

    use gcm_transport::InMemoryTransport;
    use serde_json::json;

    use super::{Relay, RelayError};
    use crate::config::RelayConfig;
    use crate::handlers::{HandlerRegistry, PayloadKind, PingHandler};
    use crate::state::{Outbox, RelayState};

    fn ping_relay(config: RelayConfig) -> Relay<InMemoryTransport> {
        let mut registry = HandlerRegistry::default();
        registry.register(PayloadKind::Ping, PingHandler);
        let outbox = Outbox::new(RelayState::new(config.quota_tracker()));
        Relay::with_registry(InMemoryTransport::default(), config, registry, outbox)
    }

    #[test]
    fn tick_without_traffic_is_idle() {
        let mut relay = ping_relay(RelayConfig::default());
        let report = relay.tick().expect("tick should succeed");
        assert_eq!(report.inbound, 0);
        assert_eq!(report.drain.sent, 0);
        assert!(relay.transport.take_outbound().is_empty());
    }

    #[test]
    fn tick_respects_inbound_batch_limit() {
        let mut relay = ping_relay(RelayConfig {
            max_inbound_batch: 2,
            ..RelayConfig::default()
        });
        for n in 0..5 {
            relay
                .transport
                .enqueue_inbound(format!(r#"{{"message_type":"ack","message_id":"{n}"}}"#));
        }
        assert_eq!(relay.tick().expect("tick").inbound, 2);
        assert_eq!(relay.tick().expect("tick").inbound, 2);
        assert_eq!(relay.tick().expect("tick").inbound, 1);
        assert_eq!(relay.stats.ack_messages, 5);
    }

    #[test]
    fn externally_queued_messages_are_flushed() {
        let mut relay = ping_relay(RelayConfig::default());
        relay.outbox().send("device", json!({"type": "news"}));
        let report = relay.tick().expect("tick");
        assert_eq!(report.drain.sent, 1);
        assert_eq!(relay.stats.sent_messages, 1);
        assert_eq!(relay.transport.take_outbound().len(), 1);
    }

    #[test]
    fn refused_sends_are_counted_and_refunded() {
        let mut relay = ping_relay(RelayConfig {
            initial_quota: 1,
            ..RelayConfig::default()
        });
        relay.transport.set_allow_send(false);
        relay.outbox().send("device", json!({}));
        relay.outbox().send("device", json!({}));

        let report = relay.tick().expect("tick");
        assert_eq!(report.drain.failed, 2);
        assert_eq!(relay.stats.send_failures, 2);
        assert_eq!(relay.outbox().lock().quota.remaining(), 1);
    }

    #[test]
    fn config_is_exposed_read_only() {
        let relay = ping_relay(RelayConfig {
            initial_quota: 3,
            ..RelayConfig::default()
        });
        assert_eq!(relay.config().initial_quota, 3);
        assert_eq!(relay.outbox().lock().quota.remaining(), 3);
    }

    #[test]
    fn disconnected_transport_stops_the_loop() {
        let mut relay = ping_relay(RelayConfig::default());
        relay.transport.set_connected(false);
        assert_eq!(relay.tick(), Err(RelayError::Disconnected));
        assert_eq!(
            relay.run(&AtomicBool::new(false)),
            Err(RelayError::Disconnected)
        );
    }

    #[test]
    fn raised_shutdown_flag_returns_immediately() {
        let mut relay = ping_relay(RelayConfig::default());
        relay.transport.enqueue_inbound(r#"{"message_type":"ack"}"#);
        relay.run(&AtomicBool::new(true)).expect("clean stop");
        assert_eq!(relay.transport.pending_inbound(), 1);
    }
}
