// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client-side delivery policies: redelivery backoff and per-kind
//! prefetch limits.

use std::time::Duration;

/// Governs the client-side decision to poison-ack a message after
/// repeated delivery failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RedeliveryPolicy {
    pub maximum_redeliveries: i32,
    pub initial_redelivery_delay: Duration,
    pub use_exponential_back_off: bool,
    pub back_off_multiplier: f64,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            maximum_redeliveries: 6,
            initial_redelivery_delay: Duration::from_millis(1000),
            use_exponential_back_off: false,
            back_off_multiplier: 5.0,
        }
    }
}

impl RedeliveryPolicy {
    /// Delay before redelivery attempt `redelivery_count` (1-based).
    pub fn delay_for(&self, redelivery_count: i32) -> Duration {
        if redelivery_count <= 0 {
            return Duration::ZERO;
        }
        if !self.use_exponential_back_off || redelivery_count == 1 {
            return self.initial_redelivery_delay;
        }
        let factor = self.back_off_multiplier.powi(redelivery_count - 1);
        self.initial_redelivery_delay.mul_f64(factor.max(1.0))
    }

    /// True once `redelivery_counter` exceeds the configured maximum. A
    /// negative maximum never poisons.
    pub fn is_exhausted(&self, redelivery_counter: i32) -> bool {
        self.maximum_redeliveries >= 0 && redelivery_counter > self.maximum_redeliveries
    }
}

/// Broker-enforced bound on unacked dispatched messages, per consumer
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefetchPolicy {
    pub queue: i32,
    pub queue_browser: i32,
    pub topic: i32,
    pub durable_topic: i32,
    pub optimize_durable_topic: i32,
}

impl Default for PrefetchPolicy {
    fn default() -> Self {
        Self {
            queue: 1000,
            queue_browser: 500,
            topic: 65535,
            durable_topic: 100,
            optimize_durable_topic: 1000,
        }
    }
}

impl PrefetchPolicy {
    /// Apply one value to every kind (`cms.prefetchPolicy.all`).
    pub fn set_all(&mut self, value: i32) {
        self.queue = value;
        self.queue_browser = value;
        self.topic = value;
        self.durable_topic = value;
        self.optimize_durable_topic = value;
    }
}

#[cfg(test)]
#[path = "policy_tests.rs"]
mod tests;
