//! Sequence number assignment and optional in-order release (§4.1.2).
//!
//! Three modes exactly as spec §4.1: `Disabled` leaves the sequence field
//! at zero (resolving spec §9's open question — the disabled sequencer
//! never increments any counter, so nothing downstream can observe a
//! nonzero sequence number), `AssignOnly` hands out a monotonic number
//! without enforcing order, `OrderingRequired` buffers by sequence number
//! and releases contiguous runs on a tick.

use crate::event::Event;
use crate::types::SequencedEvent;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SequencerMode {
    Disabled,
    AssignOnly,
    OrderingRequired,
}

/// Assigns sequence numbers and, in `OrderingRequired` mode, reorders.
pub struct Sequencer {
    mode: SequencerMode,
    next: AtomicU64,
    reorder: Mutex<ReorderBuffer>,
    capacity: usize,
    entry_timeout: Duration,
    out_of_order_dropped: AtomicU64,
}

struct ReorderBuffer {
    expected: u64,
    buffered: BTreeMap<u64, (SequencedEvent, Instant)>,
}

impl Sequencer {
    pub fn new(mode: SequencerMode, capacity: usize, entry_timeout: Duration) -> Self {
        Self {
            mode,
            next: AtomicU64::new(1),
            reorder: Mutex::new(ReorderBuffer {
                expected: 1,
                buffered: BTreeMap::new(),
            }),
            capacity: capacity.max(1),
            entry_timeout,
            out_of_order_dropped: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> SequencerMode {
        self.mode
    }

    /// Assign a sequence number to `event` per the configured mode.
    /// `Disabled` always assigns `0`.
    pub fn assign(&self, event: Arc<dyn Event>) -> SequencedEvent {
        let sequence_num = match self.mode {
            SequencerMode::Disabled => 0,
            SequencerMode::AssignOnly | SequencerMode::OrderingRequired => {
                self.next.fetch_add(1, Ordering::Relaxed)
            }
        };
        SequencedEvent {
            event,
            sequence_num,
            assigned_at: Instant::now(),
        }
    }

    /// In `OrderingRequired` mode, submit an assigned event to the reorder
    /// buffer and return any contiguous run now ready for release (may be
    /// empty). Other modes pass the event straight through.
    pub fn submit(&self, seq_event: SequencedEvent) -> Vec<SequencedEvent> {
        if self.mode != SequencerMode::OrderingRequired {
            return vec![seq_event];
        }

        let mut buf = self.reorder.lock();
        if buf.buffered.len() >= self.capacity {
            self.out_of_order_dropped.fetch_add(1, Ordering::Relaxed);
            return Vec::new();
        }
        buf.buffered
            .insert(seq_event.sequence_num, (seq_event, Instant::now()));
        drain_ready(&mut buf)
    }

    /// Called periodically to release any contiguous run and drop entries
    /// older than `entry_timeout`, advancing `expected` past the gap and
    /// incrementing the out-of-order counter by the size of the gap.
    pub fn tick(&self) -> Vec<SequencedEvent> {
        let mut buf = self.reorder.lock();
        let now = Instant::now();

        if let Some((&oldest_seq, &(_, inserted_at))) = buf.buffered.iter().next() {
            if now.duration_since(inserted_at) >= self.entry_timeout && oldest_seq > buf.expected {
                let gap = oldest_seq - buf.expected;
                self.out_of_order_dropped.fetch_add(gap, Ordering::Relaxed);
                buf.expected = oldest_seq;
            }
        }

        drain_ready(&mut buf)
    }

    pub fn out_of_order_dropped(&self) -> u64 {
        self.out_of_order_dropped.load(Ordering::Relaxed)
    }
}

fn drain_ready(buf: &mut ReorderBuffer) -> Vec<SequencedEvent> {
    let mut ready = Vec::new();
    while let Some((&seq, _)) = buf.buffered.iter().next() {
        if seq != buf.expected {
            break;
        }
        let (event, _) = buf.buffered.remove(&seq).unwrap();
        ready.push(event);
        buf.expected += 1;
    }
    ready
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawEvent;

    fn event() -> Arc<dyn Event> {
        Arc::new(RawEvent::new(serde_json::json!({})))
    }

    #[test]
    fn disabled_mode_always_assigns_zero() {
        let seq = Sequencer::new(SequencerMode::Disabled, 16, Duration::from_secs(1));
        for _ in 0..5 {
            assert_eq!(seq.assign(event()).sequence_num, 0);
        }
    }

    #[test]
    fn assign_only_is_monotonic() {
        let seq = Sequencer::new(SequencerMode::AssignOnly, 16, Duration::from_secs(1));
        let a = seq.assign(event()).sequence_num;
        let b = seq.assign(event()).sequence_num;
        assert!(b > a);
    }

    #[test]
    fn ordering_required_releases_contiguous_runs() {
        let seq = Sequencer::new(SequencerMode::OrderingRequired, 16, Duration::from_secs(5));
        let e1 = seq.assign(event());
        let e2 = seq.assign(event());
        let e3 = seq.assign(event());

        // Submit out of order: 2, 3, then 1 should release all three.
        assert!(seq.submit(e2).is_empty());
        assert!(seq.submit(e3).is_empty());
        let released = seq.submit(e1);
        assert_eq!(released.len(), 3);
        assert_eq!(released[0].sequence_num, 1);
        assert_eq!(released[1].sequence_num, 2);
        assert_eq!(released[2].sequence_num, 3);
    }

    #[test]
    fn tick_drops_stale_gap_and_advances() {
        let seq = Sequencer::new(SequencerMode::OrderingRequired, 16, Duration::from_millis(1));
        let _e1 = seq.assign(event()); // sequence_num 1, never submitted
        let e2 = seq.assign(event()); // sequence_num 2

        seq.submit(e2);
        std::thread::sleep(Duration::from_millis(5));
        let released = seq.tick();

        assert_eq!(released.len(), 1);
        assert_eq!(released[0].sequence_num, 2);
        assert_eq!(seq.out_of_order_dropped(), 1);
    }
}
