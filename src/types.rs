//! Core data types shared across the pipeline and connection layers (§3).

use crate::event::Event;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// An event paired with a monotonically increasing sequence number.
///
/// Only the sequencer constructs these, from a single per-stream-instance
/// counter, so the "unique and strictly increasing" invariant holds by
/// construction rather than by convention.
#[derive(Clone)]
pub struct SequencedEvent {
    pub event: Arc<dyn Event>,
    pub sequence_num: u64,
    pub assigned_at: Instant,
}

impl std::fmt::Debug for SequencedEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencedEvent")
            .field("event_type", &self.event.event_type())
            .field("sequence_num", &self.sequence_num)
            .field("assigned_at", &self.assigned_at)
            .finish()
    }
}

/// An ordered group of events flushed together by the batcher.
///
/// `size` always equals `events.len()` and is checked non-zero and
/// `<= MaxBatchSize` at construction — `EventBatch::new` is the only way
/// to build one.
#[derive(Clone, Debug)]
pub struct EventBatch {
    pub batch_id: u128,
    pub events: Vec<Arc<dyn Event>>,
    pub created_at: Instant,
    pub size: usize,
}

impl EventBatch {
    /// Build a batch, enforcing `0 < size <= max_size`.
    pub fn new(batch_id: u128, events: Vec<Arc<dyn Event>>, max_size: usize) -> Option<Self> {
        let size = events.len();
        if size == 0 || size > max_size {
            return None;
        }
        Some(Self {
            batch_id,
            events,
            created_at: Instant::now(),
            size,
        })
    }
}

/// The pipeline's unit of emission.
///
/// For a multi-chunk payload every chunk shares `event_id`, `total_chunks`,
/// and `sequence_num`; `chunk_index` is zero-based and strictly less than
/// `total_chunks`; concatenating payloads in `chunk_index` order reproduces
/// the pre-chunking bytes.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct StreamChunk {
    pub payload: Bytes,
    pub event_type: String,
    pub event_id: String,
    pub retry_hint: Option<Duration>,
    pub compressed: bool,
    pub sequence_num: u64,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub timestamp: Instant,
}

impl StreamChunk {
    pub fn is_single(&self) -> bool {
        self.total_chunks == 1
    }
}

/// A server-pushed event decoded and (if it was chunked) reassembled,
/// handed to `Transport::receive()` callers. Unlike [`StreamChunk`] this
/// is always a complete payload — chunk bookkeeping is internal to the
/// receive path.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct InboundEvent {
    pub event_type: String,
    pub event_id: String,
    pub payload: Bytes,
    pub sequence_num: u64,
    pub retry_hint: Option<Duration>,
}
