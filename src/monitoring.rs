//! Monitoring hooks (§2, interface only): atomic counters, latency
//! samples, and alert gating. Concrete sinks (Prometheus, OTel, a paging
//! integration) are external collaborators; this module only defines the
//! shape the rest of the crate reports into.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Lock-free counters shared by the pipeline, connection, pool, and
/// transport layers.
#[derive(Debug, Default)]
pub struct Counters {
    pub events_accepted: AtomicU64,
    pub events_dropped: AtomicU64,
    pub chunks_emitted: AtomicU64,
    pub compression_errors: AtomicU64,
    pub out_of_order_dropped: AtomicU64,
    pub reconnect_attempts: AtomicU64,
    pub heartbeat_misses: AtomicU64,
    pub worker_panics: AtomicU64,
}

impl Counters {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            events_accepted: self.events_accepted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            compression_errors: self.compression_errors.load(Ordering::Relaxed),
            out_of_order_dropped: self.out_of_order_dropped.load(Ordering::Relaxed),
            reconnect_attempts: self.reconnect_attempts.load(Ordering::Relaxed),
            heartbeat_misses: self.heartbeat_misses.load(Ordering::Relaxed),
            worker_panics: self.worker_panics.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time read of [`Counters`], cheap to hand to a caller or log.
#[derive(Debug, Clone, Copy, Default)]
pub struct CountersSnapshot {
    pub events_accepted: u64,
    pub events_dropped: u64,
    pub chunks_emitted: u64,
    pub compression_errors: u64,
    pub out_of_order_dropped: u64,
    pub reconnect_attempts: u64,
    pub heartbeat_misses: u64,
    pub worker_panics: u64,
}

/// Latency sample sink. Concrete implementations (histograms exported to
/// a metrics backend) are external; the default records nothing.
pub trait LatencySink: Send + Sync {
    fn record(&self, operation: &str, duration: Duration);
}

/// A `LatencySink` that discards every sample, used when no concrete
/// sink is configured.
#[derive(Debug, Default)]
pub struct NoopLatencySink;

impl LatencySink for NoopLatencySink {
    fn record(&self, _operation: &str, _duration: Duration) {}
}

/// Gate that decides whether a counter crossing a threshold should page
/// someone. Concrete alerting policy (thresholds, escalation, routing) is
/// an external collaborator; this trait only defines the call shape.
pub trait AlertGate: Send + Sync {
    fn should_alert(&self, counters: &CountersSnapshot) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_increments() {
        let counters = Counters::new();
        counters.events_accepted.fetch_add(3, Ordering::Relaxed);
        counters.events_dropped.fetch_add(1, Ordering::Relaxed);
        let snap = counters.snapshot();
        assert_eq!(snap.events_accepted, 3);
        assert_eq!(snap.events_dropped, 1);
    }
}
