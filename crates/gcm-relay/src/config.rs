use std::time::Duration;

use crate::handlers::DEFAULT_REPLY_DELAY;
use crate::quota::{QuotaTracker, DEFAULT_UNACKED_QUOTA};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Credits for unacknowledged downstream messages.
    pub initial_quota: u32,
    /// Keep the credit pool from growing past `initial_quota`.
    pub clamp_quota: bool,
    /// Longest wait for inbound traffic in one tick.
    pub process_timeout: Duration,
    /// Max inbound payloads handled per tick.
    pub max_inbound_batch: usize,
    /// Wait before answering a `delay` payload.
    pub reply_delay: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            initial_quota: DEFAULT_UNACKED_QUOTA,
            clamp_quota: true,
            process_timeout: Duration::from_secs(1),
            max_inbound_batch: 64,
            reply_delay: DEFAULT_REPLY_DELAY,
        }
    }
}

impl RelayConfig {
    /// Returns a fresh quota tracker derived from config.
    pub fn quota_tracker(&self) -> QuotaTracker {
        if self.clamp_quota {
            QuotaTracker::new(self.initial_quota)
        } else {
            QuotaTracker::unclamped(self.initial_quota)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::RelayConfig;
    use crate::quota::AckSignal;

    #[test]
    fn defaults_match_connection_server_limits() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.initial_quota, 1000);
        assert!(cfg.clamp_quota);
        assert_eq!(cfg.process_timeout, Duration::from_secs(1));
        assert_eq!(cfg.max_inbound_batch, 64);
        assert_eq!(cfg.reply_delay, Duration::from_secs(30));
    }

    #[test]
    fn quota_tracker_reflects_clamp_setting() {
        let cfg = RelayConfig {
            initial_quota: 2,
            ..RelayConfig::default()
        };
        let mut clamped = cfg.quota_tracker();
        clamped.replenish(AckSignal::Ack);
        assert_eq!(clamped.remaining(), 2);

        let cfg = RelayConfig {
            clamp_quota: false,
            ..cfg
        };
        let mut unclamped = cfg.quota_tracker();
        unclamped.replenish(AckSignal::Ack);
        assert_eq!(unclamped.remaining(), 3);
    }
}
