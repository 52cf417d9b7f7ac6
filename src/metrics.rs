//! Metrics instrumentation for myhero-ernst.
//!
//! All metrics are prefixed with `myhero_ernst.`

use metrics::{counter, histogram};
use std::time::Instant;

use crate::forwarder::VoteResult;

/// Record a processed vote.
pub fn record_vote(result: VoteResult, duration: std::time::Duration) {
    let result_str = if result.is_success() {
        "success"
    } else {
        "failure"
    };

    counter!("myhero_ernst.vote.count", "result" => result_str).increment(1);
    histogram!("myhero_ernst.vote.duration.seconds").record(duration.as_secs_f64());
}

/// Record a broker connection acknowledgment.
pub fn record_broker_connect() {
    counter!("myhero_ernst.broker.connect.count").increment(1);
}

/// Record a dropped broker connection.
pub fn record_broker_disconnect() {
    counter!("myhero_ernst.broker.disconnect.count").increment(1);
}

/// Record a subscribe request for the vote topic.
pub fn record_subscribe() {
    counter!("myhero_ernst.broker.subscribe.count").increment(1);
}

/// Record a DNS lookup made during service discovery.
pub fn record_lookup(record: &'static str, result: LookupResult) {
    let result_str = match result {
        LookupResult::Found => "found",
        LookupResult::Empty => "empty",
        LookupResult::Error => "error",
    };

    counter!("myhero_ernst.discovery.lookup.count", "record" => record, "result" => result_str)
        .increment(1);
}

/// Lookup outcome for metrics.
#[derive(Debug, Clone, Copy)]
pub enum LookupResult {
    /// At least one record returned.
    Found,
    /// Name resolved to no records (or NXDOMAIN).
    Empty,
    /// Resolver failure.
    Error,
}

/// Helper for timing operations.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Start a new timer.
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed duration since timer start.
    pub fn elapsed(&self) -> std::time::Duration {
        self.start.elapsed()
    }
}
