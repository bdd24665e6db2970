//! Backpressure policy (§4.4, §6 `BackpressureConfig`).
//!
//! Utilization is the standard `tokio::mpsc` idiom — `capacity()` against
//! the channel's configured buffer size — rather than a separate gauge.
//! Grounded on the teacher's counters-as-atomics style (`producer.rs`'s
//! in-flight tracking) generalized to the three drop actions spec §4.4
//! names.

use crate::config::{BackpressureConfig, DropActionType};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// What a caller should do after a unit of work was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropOutcome {
    /// Recorded; policy says keep going.
    Logged,
    /// Dropped-event threshold crossed with `DropActionType::Reconnect`.
    ShouldReconnect,
    /// Dropped-event threshold crossed with `DropActionType::Stop`.
    ShouldStop,
}

/// Tracks channel utilization and dropped-unit counts, translating them
/// into the configured [`DropActionType`].
pub struct BackpressureMonitor {
    config: BackpressureConfig,
    active: AtomicBool,
    dropped: AtomicU64,
}

impl BackpressureMonitor {
    pub fn new(config: BackpressureConfig) -> Self {
        Self {
            config,
            active: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Utilization of a bounded channel, as a percentage, from its
    /// configured `capacity` and the `Sender::capacity()` currently
    /// `available`.
    pub fn utilization_percent(capacity: usize, available: usize) -> u8 {
        if capacity == 0 {
            return 0;
        }
        let used = capacity.saturating_sub(available.min(capacity));
        ((used as f64 / capacity as f64) * 100.0).round() as u8
    }

    /// Update the active flag from a channel's current utilization.
    pub fn observe(&self, capacity: usize, available: usize) {
        let pct = Self::utilization_percent(capacity, available);
        let active = pct >= self.config.threshold_percent;
        let was_active = self.active.swap(active, Ordering::Relaxed);
        if active && !was_active && self.config.enable_logging {
            #[cfg(feature = "tracing")]
            tracing::warn!(pct, threshold = self.config.threshold_percent, "backpressure threshold exceeded");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Record one dropped unit of work and return what the caller should
    /// do about it.
    pub fn record_drop(&self) -> DropOutcome {
        let count = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if self.config.enable_logging {
            #[cfg(feature = "tracing")]
            tracing::warn!(count, "event dropped under backpressure");
        }
        if count >= self.config.max_dropped_events {
            match self.config.drop_action {
                DropActionType::Log => DropOutcome::Logged,
                DropActionType::Reconnect => DropOutcome::ShouldReconnect,
                DropActionType::Stop => DropOutcome::ShouldStop,
            }
        } else {
            DropOutcome::Logged
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.active.store(false, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
    }
}
