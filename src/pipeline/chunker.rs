//! Size-based chunking (§4.1, §4.1.4).
//!
//! Purely a function of the post-compression byte sequence; reassembly is
//! the reader's responsibility using `(event_id, chunk_index,
//! total_chunks)`. Grounded on the generic index/total-chunks pairing used
//! by `jLantxa-mapache/src/archiver/chunker.rs` and
//! `.../src/uploader/chunk.rs` in the retrieval pack.

use crate::types::StreamChunk;
use bytes::Bytes;
use std::time::{Duration, Instant};

/// Split `payload` into `ceil(len / max_chunk_size)` chunks sharing
/// `event_id` and `sequence_num`. Every chunk's payload length is
/// `<= max_chunk_size`; concatenating chunks in `chunk_index` order
/// reproduces `payload`.
pub fn split(
    payload: &[u8],
    max_chunk_size: usize,
    event_type: &str,
    event_id: &str,
    sequence_num: u64,
    compressed: bool,
    retry_hint: Option<Duration>,
) -> Vec<StreamChunk> {
    assert!(max_chunk_size > 0, "max_chunk_size must be positive");

    if payload.is_empty() {
        let now = Instant::now();
        return vec![StreamChunk {
            payload: Bytes::new(),
            event_type: event_type.to_string(),
            event_id: event_id.to_string(),
            retry_hint,
            compressed,
            sequence_num,
            chunk_index: 0,
            total_chunks: 1,
            timestamp: now,
        }];
    }

    let total_chunks = payload.len().div_ceil(max_chunk_size) as u32;
    let now = Instant::now();

    payload
        .chunks(max_chunk_size)
        .enumerate()
        .map(|(i, slice)| StreamChunk {
            payload: Bytes::copy_from_slice(slice),
            event_type: event_type.to_string(),
            event_id: event_id.to_string(),
            retry_hint,
            compressed,
            sequence_num,
            chunk_index: i as u32,
            total_chunks,
            timestamp: now,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_chunk_when_payload_fits() {
        let chunks = split(b"hi", 16, "A", "evt-1", 0, false, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total_chunks, 1);
        assert_eq!(chunks[0].chunk_index, 0);
    }

    #[test]
    fn splits_oversized_payload_into_ordered_chunks() {
        let payload = vec![b'x'; 50];
        let chunks = split(&payload, 16, "A", "evt-2", 7, false, None);
        assert_eq!(chunks.len(), 4);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as u32);
            assert_eq!(c.total_chunks, 4);
            assert_eq!(c.event_id, "evt-2");
            assert_eq!(c.sequence_num, 7);
            assert!(c.payload.len() <= 16);
        }

        let reassembled: Vec<u8> = chunks.iter().flat_map(|c| c.payload.to_vec()).collect();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn empty_payload_yields_one_empty_chunk() {
        let chunks = split(b"", 16, "A", "evt-3", 0, false, None);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].payload.len(), 0);
    }
}
