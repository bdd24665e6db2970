//! Size/time-bounded batch accumulation (§4.1.3).
//!
//! Grounded on `genai-rs-langfuse-ergonomic/src/batcher.rs`'s
//! `BatcherConfig` (max events, flush interval) and on the teacher's
//! `producer.rs` discipline of mutating batch state behind a sync-only
//! `parking_lot::Mutex` with no `.await` under the lock, then doing the
//! actual send/serialize work after the lock is dropped.

use crate::event::Event;
use crate::types::EventBatch;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Batcher {
    flush_size: usize,
    max_size: usize,
    batch_timeout: Duration,
    state: Mutex<BatcherState>,
    next_batch_id: AtomicU64,
}

struct BatcherState {
    pending: Vec<Arc<dyn Event>>,
    started_at: Option<Instant>,
}

impl Batcher {
    /// `flush_size` triggers a size-based flush as soon as it's reached;
    /// `max_size` is the hard ceiling `EventBatch::new` enforces on the
    /// resulting batch (raised to `flush_size` if given smaller, since a
    /// ceiling below the trigger would reject every flushed batch).
    pub fn new(flush_size: usize, max_size: usize, batch_timeout: Duration) -> Self {
        let flush_size = flush_size.max(1);
        let max_size = max_size.max(flush_size);
        Self {
            flush_size,
            max_size,
            batch_timeout,
            state: Mutex::new(BatcherState {
                pending: Vec::new(),
                started_at: None,
            }),
            next_batch_id: AtomicU64::new(1),
        }
    }

    /// Push an event onto the pending batch. Returns a flushed batch if
    /// this push reached `flush_size`.
    pub fn push(&self, event: Arc<dyn Event>) -> Option<EventBatch> {
        let mut state = self.state.lock();
        if state.pending.is_empty() {
            state.started_at = Some(Instant::now());
        }
        state.pending.push(event);

        if state.pending.len() >= self.flush_size {
            return self.flush_locked(&mut state);
        }
        None
    }

    /// Called periodically; flushes if the oldest pending event has been
    /// waiting at least `batch_timeout`.
    pub fn tick(&self) -> Option<EventBatch> {
        let mut state = self.state.lock();
        let due = state
            .started_at
            .is_some_and(|t| t.elapsed() >= self.batch_timeout);
        if due {
            return self.flush_locked(&mut state);
        }
        None
    }

    /// Flush whatever is pending regardless of size/time, used by
    /// `close()` to avoid losing a partial batch.
    pub fn flush(&self) -> Option<EventBatch> {
        let mut state = self.state.lock();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut BatcherState) -> Option<EventBatch> {
        if state.pending.is_empty() {
            return None;
        }
        let events: Vec<_> = state.pending.drain(..).collect();
        state.started_at = None;
        let batch_id = self.next_batch_id.fetch_add(1, Ordering::Relaxed) as u128;
        EventBatch::new(batch_id, events, self.max_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;

    fn event() -> Arc<dyn Event> {
        Arc::new(RawEvent::new(serde_json::json!({})))
    }

    #[test]
    fn flushes_on_reaching_max_size() {
        let batcher = Batcher::new(3, 3, Duration::from_secs(10));
        assert!(batcher.push(event()).is_none());
        assert!(batcher.push(event()).is_none());
        let batch = batcher.push(event()).expect("third push flushes");
        assert_eq!(batch.size, 3);
    }

    #[test]
    fn preserves_arrival_order() {
        let batcher = Batcher::new(3, 3, Duration::from_secs(10));
        let tagged: Vec<Arc<dyn Event>> = (0..3)
            .map(|i| Arc::new(RawEvent::new(serde_json::json!({"i": i}))) as Arc<dyn Event>)
            .collect();
        for e in &tagged {
            batcher.push(e.clone());
        }
        let batch = batcher.flush();
        assert!(batch.is_none(), "already flushed by size");
    }

    #[test]
    fn tick_flushes_after_timeout_elapses() {
        let batcher = Batcher::new(10, 10, Duration::from_millis(5));
        batcher.push(event());
        assert!(batcher.tick().is_none());
        std::thread::sleep(Duration::from_millis(10));
        let batch = batcher.tick().expect("timeout elapsed");
        assert_eq!(batch.size, 1);
    }

    #[test]
    fn flush_on_close_returns_partial_batch() {
        let batcher = Batcher::new(10, 10, Duration::from_secs(10));
        batcher.push(event());
        batcher.push(event());
        let batch = batcher.flush().expect("partial batch flushed on close");
        assert_eq!(batch.size, 2);
    }

    #[test]
    fn max_size_below_flush_size_is_raised_to_match() {
        let batcher = Batcher::new(5, 2, Duration::from_secs(10));
        for _ in 0..4 {
            assert!(batcher.push(event()).is_none());
        }
        let batch = batcher.push(event()).expect("fifth push reaches flush_size");
        assert_eq!(batch.size, 5);
    }
}
