//! Core metrics: atomic counters mirrored to the `metrics` facade so the
//! Prometheus exporter and in-process status reads see the same numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Service-wide counters.
#[derive(Debug, Default)]
pub struct CoreMetrics {
    sessions_opened: AtomicU64,
    sessions_settled: AtomicU64,
    ticks_recorded: AtomicU64,
    payment_failures: AtomicU64,
    reconnect_attempts: AtomicU64,
    relay_forwarded: AtomicU64,
    relay_rejected: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sessions_opened: u64,
    pub sessions_settled: u64,
    pub ticks_recorded: u64,
    pub payment_failures: u64,
    pub reconnect_attempts: u64,
    pub relay_forwarded: u64,
    pub relay_rejected: u64,
}

impl CoreMetrics {
    /// Create shared metrics.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_sessions_opened_total").increment(1);
    }

    pub fn session_settled(&self) {
        self.sessions_settled.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_sessions_settled_total").increment(1);
    }

    pub fn tick_recorded(&self) {
        self.ticks_recorded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_billing_ticks_total").increment(1);
    }

    pub fn payment_failure(&self) {
        self.payment_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_payment_failures_total").increment(1);
    }

    pub fn reconnect_attempt(&self) {
        self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_reconnect_attempts_total").increment(1);
    }

    pub fn relay_forwarded(&self) {
        self.relay_forwarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_relay_forwarded_total").increment(1);
    }

    pub fn relay_rejected(&self) {
        self.relay_rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("sc_relay_rejected_total").increment(1);
    }

    /// Copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_opened: self.sessions_opened.load(Ordering::Relaxed),
            sessions_settled: self.sessions_settled.load(Ordering::Relaxed),
            ticks_recorded: self.ticks_recorded.load(Ordering::Relaxed),
            payment_failures: self.payment_failures.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            relay_forwarded: self.relay_forwarded.load(Ordering::Relaxed),
            relay_rejected: self.relay_rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = CoreMetrics::new();
        metrics.session_opened();
        metrics.session_opened();
        metrics.tick_recorded();
        metrics.relay_rejected();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.sessions_opened, 2);
        assert_eq!(snapshot.ticks_recorded, 1);
        assert_eq!(snapshot.relay_rejected, 1);
        assert_eq!(snapshot.sessions_settled, 0);
    }
}
