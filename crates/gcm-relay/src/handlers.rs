//! Application payload handlers.
//!
//! Upstream payloads carry a `type` tag that selects a handler. Handlers
//! reply by queuing downstream messages on the shared `Outbox`.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::scheduler::{DelayScheduler, ScheduledTask};
use crate::state::Outbox;

/// Default wait before a `delay` payload is answered.
pub const DEFAULT_REPLY_DELAY: Duration = Duration::from_secs(30);

/// Payload kinds the relay knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    /// Answered immediately with `pong`.
    Ping,
    /// Answered with `pongdelay` after the reply delay.
    Delay,
}

impl PayloadKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ping" => Some(Self::Ping),
            "delay" => Some(Self::Delay),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Delay => "delay",
        }
    }
}

/// What a handler did with a payload.
#[derive(Debug)]
pub enum HandleOutcome {
    /// A reply was queued with this message id.
    Replied { message_id: String },
    /// A reply will be queued when the task fires.
    Scheduled(ScheduledTask),
}

/// Common interface of payload handlers.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, from: &str, payload: &Value, outbox: &Outbox) -> HandleOutcome;
}

fn echo_reply(reply_type: &str, payload: &Value) -> Value {
    let message = payload.get("message").cloned().unwrap_or(Value::Null);
    json!({ "type": reply_type, "message": message })
}

/// Replies with the same message, immediately.
#[derive(Debug, Clone, Copy, Default)]
pub struct PingHandler;

impl MessageHandler for PingHandler {
    fn handle(&self, from: &str, payload: &Value, outbox: &Outbox) -> HandleOutcome {
        let message_id = outbox.send(from, echo_reply("pong", payload));
        HandleOutcome::Replied { message_id }
    }
}

/// Replies with the same message after a fixed delay.
#[derive(Debug, Clone)]
pub struct DelayHandler {
    scheduler: DelayScheduler,
    delay: Duration,
}

impl DelayHandler {
    pub fn new(scheduler: DelayScheduler, delay: Duration) -> Self {
        Self { scheduler, delay }
    }
}

impl MessageHandler for DelayHandler {
    fn handle(&self, from: &str, payload: &Value, outbox: &Outbox) -> HandleOutcome {
        let outbox = outbox.clone();
        let to = from.to_string();
        let reply = echo_reply("pongdelay", payload);
        let delay = self.delay;
        let task = self.scheduler.schedule(delay, move || {
            let message_id = outbox.send(to.as_str(), reply);
            debug!("delayed reply {message_id} queued for {to} after {delay:?}");
        });
        HandleOutcome::Scheduled(task)
    }
}

/// Result of routing one payload.
#[derive(Debug)]
pub enum DispatchOutcome {
    Handled {
        kind: PayloadKind,
        outcome: HandleOutcome,
    },
    /// Payload had no string `type` field.
    MissingType,
    /// Payload `type` had no registered handler.
    Unregistered(String),
}

/// Typed map from payload kind to handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<PayloadKind, Box<dyn MessageHandler>>,
}

impl HandlerRegistry {
    /// Registry with the `ping` and `delay` handlers installed.
    pub fn with_builtin(scheduler: DelayScheduler, reply_delay: Duration) -> Self {
        let mut registry = Self::default();
        registry.register(PayloadKind::Ping, PingHandler);
        registry.register(
            PayloadKind::Delay,
            DelayHandler::new(scheduler, reply_delay),
        );
        registry
    }

    /// Installs `handler` for `kind`, returning the handler it replaced.
    pub fn register(
        &mut self,
        kind: PayloadKind,
        handler: impl MessageHandler + 'static,
    ) -> Option<Box<dyn MessageHandler>> {
        self.handlers.insert(kind, Box::new(handler))
    }

    pub fn is_registered(&self, kind: PayloadKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Routes `payload` from `from` to its handler.
    ///
    /// Unroutable payloads are logged with their content and dropped.
    pub fn dispatch(&self, from: &str, payload: &Value, outbox: &Outbox) -> DispatchOutcome {
        let Some(tag) = payload.get("type").and_then(Value::as_str) else {
            warn!(
                "do not know how to handle message without type from {from}: {}",
                pretty(payload)
            );
            return DispatchOutcome::MissingType;
        };
        let handler = PayloadKind::from_tag(tag)
            .and_then(|kind| self.handlers.get(&kind).map(|handler| (kind, handler)));
        let Some((kind, handler)) = handler else {
            warn!(
                "do not know how to handle message of type {tag:?} from {from}: {}",
                pretty(payload)
            );
            return DispatchOutcome::Unregistered(tag.to_string());
        };
        debug!("dispatching {} payload from {from}", kind.as_str());
        DispatchOutcome::Handled {
            kind,
            outcome: handler.handle(from, payload, outbox),
        }
    }
}

fn pretty(payload: &Value) -> String {
    serde_json::to_string_pretty(payload).unwrap_or_else(|_| payload.to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::{
        DispatchOutcome, HandleOutcome, HandlerRegistry, MessageHandler, PayloadKind,
        PingHandler,
    };
    use crate::scheduler::DelayScheduler;
    use crate::state::Outbox;

    fn queued(outbox: &Outbox) -> Vec<(String, Value)> {
        outbox
            .lock()
            .queue
            .iter()
            .map(|m| (m.recipient.clone(), m.data.clone()))
            .collect()
    }

    #[test]
    fn payload_kind_tags_round_trip() {
        for kind in [PayloadKind::Ping, PayloadKind::Delay] {
            assert_eq!(PayloadKind::from_tag(kind.as_str()), Some(kind));
        }
        assert_eq!(PayloadKind::from_tag("pong"), None);
    }

    #[test]
    fn ping_replies_with_pong_to_sender() {
        let outbox = Outbox::default();
        let outcome = PingHandler.handle("X", &json!({"type": "ping", "message": "hi"}), &outbox);
        assert!(matches!(outcome, HandleOutcome::Replied { .. }));
        assert_eq!(
            queued(&outbox),
            vec![("X".to_string(), json!({"type": "pong", "message": "hi"}))]
        );
    }

    #[test]
    fn missing_message_is_echoed_as_null() {
        let outbox = Outbox::default();
        PingHandler.handle("X", &json!({"type": "ping"}), &outbox);
        assert_eq!(
            queued(&outbox),
            vec![("X".to_string(), json!({"type": "pong", "message": null}))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn delay_replies_once_after_the_delay() {
        let outbox = Outbox::default();
        let registry =
            HandlerRegistry::with_builtin(DelayScheduler::current(), Duration::from_secs(30));

        let outcome = registry.dispatch("X", &json!({"type": "delay", "message": "hi"}), &outbox);
        assert!(matches!(
            outcome,
            DispatchOutcome::Handled {
                kind: PayloadKind::Delay,
                outcome: HandleOutcome::Scheduled(_),
            }
        ));
        assert_eq!(outbox.pending(), 0);

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert_eq!(outbox.pending(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(
            queued(&outbox),
            vec![("X".to_string(), json!({"type": "pongdelay", "message": "hi"}))]
        );

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(outbox.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_delay_never_replies() {
        let outbox = Outbox::default();
        let registry =
            HandlerRegistry::with_builtin(DelayScheduler::current(), Duration::from_secs(30));
        let outcome = registry.dispatch("X", &json!({"type": "delay", "message": "hi"}), &outbox);
        let DispatchOutcome::Handled {
            outcome: HandleOutcome::Scheduled(task),
            ..
        } = outcome
        else {
            panic!("expected a scheduled reply");
        };
        task.cancel();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(outbox.pending(), 0);
    }

    #[tokio::test]
    async fn unknown_or_missing_type_has_no_side_effects() {
        let outbox = Outbox::default();
        let registry =
            HandlerRegistry::with_builtin(DelayScheduler::current(), Duration::from_secs(30));

        let outcome = registry.dispatch("X", &json!({"type": "unknown-tag"}), &outbox);
        assert!(matches!(outcome, DispatchOutcome::Unregistered(ref tag) if tag == "unknown-tag"));

        let outcome = registry.dispatch("X", &json!({"message": "no type"}), &outbox);
        assert!(matches!(outcome, DispatchOutcome::MissingType));

        let outcome = registry.dispatch("X", &json!({"type": 7}), &outbox);
        assert!(matches!(outcome, DispatchOutcome::MissingType));

        assert_eq!(outbox.pending(), 0);
    }

    #[test]
    fn known_kind_without_handler_is_unregistered() {
        let outbox = Outbox::default();
        let mut registry = HandlerRegistry::default();
        registry.register(PayloadKind::Ping, PingHandler);
        assert!(registry.is_registered(PayloadKind::Ping));
        assert!(!registry.is_registered(PayloadKind::Delay));

        let outcome = registry.dispatch("X", &json!({"type": "delay", "message": "hi"}), &outbox);
        assert!(matches!(outcome, DispatchOutcome::Unregistered(ref tag) if tag == "delay"));
        assert_eq!(outbox.pending(), 0);
    }

    #[test]
    fn register_replaces_existing_handler() {
        struct Silent;
        impl MessageHandler for Silent {
            fn handle(&self, _from: &str, _payload: &Value, outbox: &Outbox) -> HandleOutcome {
                HandleOutcome::Replied {
                    message_id: outbox.send("sink", json!({})),
                }
            }
        }

        let outbox = Outbox::default();
        let mut registry = HandlerRegistry::default();
        assert!(registry.register(PayloadKind::Ping, PingHandler).is_none());
        assert!(registry.register(PayloadKind::Ping, Silent).is_some());

        registry.dispatch("X", &json!({"type": "ping", "message": "hi"}), &outbox);
        assert_eq!(queued(&outbox), vec![("sink".to_string(), json!({}))]);
    }
}
