//! Bounded flow control with timed acquire and explicit drain (§4.1.1).
//!
//! Grounded on the `Arc<Semaphore>` backpressure gate in
//! `Kevinzh0C-Fechatter/.../high_performance/high_pe*.rs` (semaphore sized
//! to `max_concurrent`, `acquire_owned` per unit of work, released on
//! drop), generalized here with a timed acquire per spec §4.1.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded semaphore gating concurrent in-flight events.
pub struct FlowController {
    semaphore: Arc<Semaphore>,
    acquired: AtomicU64,
    rejected: AtomicU64,
    released: Arc<AtomicU64>,
}

/// An RAII permit; releasing is dropping it.
pub struct FlowPermit {
    _permit: OwnedSemaphorePermit,
    released: Arc<AtomicU64>,
}

impl FlowController {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            acquired: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            released: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Acquire a slot, bounded by `timeout`. Returns `None` if the
    /// deadline elapses before a slot frees up.
    pub async fn acquire(&self, timeout: Duration) -> Option<FlowPermit> {
        match tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned()).await {
            Ok(Ok(permit)) => {
                self.acquired.fetch_add(1, Ordering::Relaxed);
                Some(FlowPermit {
                    _permit: permit,
                    released: self.released.clone(),
                })
            }
            _ => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Acquire every outstanding permit, blocking until in-flight work
    /// drains. Used by `Pipeline::close` to wait out active workers.
    pub async fn drain(&self, total_permits: usize) {
        if let Ok(permits) = self.semaphore.clone().acquire_many_owned(total_permits as u32).await {
            drop(permits);
        }
    }

    pub fn acquired_count(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn released_count(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl Drop for FlowPermit {
    fn drop(&mut self) {
        self.released.fetch_add(1, Ordering::Relaxed);
    }
}
