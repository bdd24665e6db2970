//! SSE wire codec (§4.5): encode a `StreamChunk` to frame bytes, and parse
//! frame bytes back into a raw, un-typed SSE event.
//!
//! Grounded on the teacher's line-oriented `SseParser` (`sse.rs`) and the
//! inline state machine in `iterator.rs`: `strip_prefix` field parsing,
//! data-line accumulation joined by `\n`, blank-line dispatch. Generalized
//! here to this crate's chunk framing (`event:`/`id:`/`retry:`/two
//! possible `data:` lines) instead of the teacher's `control`/data split.

use crate::types::StreamChunk;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A decoded, but not yet application-typed, SSE frame.
///
/// `data_lines` is kept unjoined rather than pre-concatenated: this
/// wire format puts the payload on the first `data:` line and, only for
/// `total_chunks > 1`, the chunk metadata on a second — joining them
/// would corrupt both. Generic callers that just want "the data, per
/// the SSE spec's repeated-line-join rule" can use [`joined_data`].
///
/// [`joined_data`]: RawSseFrame::joined_data
#[derive(Debug, Clone, Default)]
pub struct RawSseFrame {
    pub event_type: Option<String>,
    pub id: Option<String>,
    pub retry_ms: Option<u64>,
    pub data_lines: Vec<String>,
}

/// Chunk metadata carried as a second `data:` line when a payload spans
/// more than one chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkMeta {
    sequence_num: u64,
    chunk_index: u32,
    total_chunks: u32,
}

/// A frame decoded back into its chunk shape: payload bytes (still
/// base64-unwrapped but not yet gzip/deflate-decompressed — the caller
/// knows the compression type, this module doesn't) plus chunk position.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    pub event_type: String,
    pub event_id: String,
    pub payload: Vec<u8>,
    pub compressed: bool,
    pub sequence_num: u64,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub retry_hint: Option<Duration>,
}

/// Reverse of [`encode`]: split the payload `data:` line from the
/// optional chunk-metadata `data:` line and reconstruct chunk position.
/// Single-chunk frames (no metadata line) default to
/// `chunk_index = 0, total_chunks = 1, sequence_num = 0`.
pub fn decode_frame(frame: &RawSseFrame) -> Option<DecodedFrame> {
    let payload_line = frame.data_lines.first()?;
    let (payload, compressed) = decode_payload(payload_line);

    let (sequence_num, chunk_index, total_chunks) = frame
        .data_lines
        .get(1)
        .and_then(|line| serde_json::from_str::<ChunkMeta>(line).ok())
        .map(|m| (m.sequence_num, m.chunk_index, m.total_chunks))
        .unwrap_or((0, 0, 1));

    let raw_id = frame.id.clone().unwrap_or_default();
    let event_id = if total_chunks > 1 {
        raw_id
            .rsplit_once('-')
            .map(|(base, _)| base.to_string())
            .unwrap_or(raw_id)
    } else {
        raw_id
    };

    Some(DecodedFrame {
        event_type: frame.event_type.clone().unwrap_or_default(),
        event_id,
        payload,
        compressed,
        sequence_num,
        chunk_index,
        total_chunks,
        retry_hint: frame.retry_hint(),
    })
}

/// Envelope used when the payload was compressed before chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CompressedEnvelope {
    compressed: bool,
    data: String,
}

/// Encode a chunk as SSE frame bytes, per §4.5:
///
/// ```text
/// event: <type>
/// id: <event-id[-chunk-index if total_chunks>1]>
/// retry: <ms>
/// data: <payload>
/// data: <chunk-metadata JSON>      (only if total_chunks > 1)
///
/// ```
pub fn encode(chunk: &StreamChunk) -> String {
    let mut out = String::new();

    out.push_str("event: ");
    out.push_str(&chunk.event_type);
    out.push('\n');

    out.push_str("id: ");
    out.push_str(&chunk.event_id);
    if chunk.total_chunks > 1 {
        out.push('-');
        out.push_str(&chunk.chunk_index.to_string());
    }
    out.push('\n');

    if let Some(retry) = chunk.retry_hint {
        out.push_str("retry: ");
        out.push_str(&retry.as_millis().to_string());
        out.push('\n');
    }

    out.push_str("data: ");
    if chunk.compressed {
        let envelope = CompressedEnvelope {
            compressed: true,
            data: BASE64.encode(&chunk.payload),
        };
        out.push_str(&serde_json::to_string(&envelope).unwrap_or_default());
    } else {
        out.push_str(&String::from_utf8_lossy(&chunk.payload));
    }
    out.push('\n');

    if chunk.total_chunks > 1 {
        let meta = ChunkMeta {
            sequence_num: chunk.sequence_num,
            chunk_index: chunk.chunk_index,
            total_chunks: chunk.total_chunks,
        };
        out.push_str("data: ");
        out.push_str(&serde_json::to_string(&meta).unwrap_or_default());
        out.push('\n');
    }

    out.push('\n');
    out
}

/// Decode a compressed-payload `data:` envelope, if the frame carries one.
///
/// Returns `(bytes, compressed)`: `bytes` are base64-decoded but, when
/// `compressed` is `true`, still gzip/deflate-compressed — decompressing
/// them is the caller's job since only the caller knows which
/// `CompressionType` was configured. `compressed == false` means `bytes`
/// is the payload verbatim.
pub fn decode_payload(data: &str) -> (Vec<u8>, bool) {
    if let Ok(envelope) = serde_json::from_str::<CompressedEnvelope>(data) {
        if envelope.compressed {
            if let Ok(bytes) = BASE64.decode(envelope.data.as_bytes()) {
                return (bytes, true);
            }
        }
    }
    (data.as_bytes().to_vec(), false)
}

/// Streaming, line-oriented SSE frame parser.
///
/// Accepts `\n`- or `\r\n`-terminated lines; any field may repeat; `data`
/// lines are concatenated with `\n`; a single leading space after the
/// colon is stripped; comment lines (`:...`) are ignored; a blank line
/// delivers the accumulated frame.
#[derive(Default)]
pub struct SseFrameParser {
    event_type: Option<String>,
    id: Option<String>,
    retry_ms: Option<u64>,
    data_lines: Vec<String>,
}

impl SseFrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one already-newline-stripped line. Returns `Some(frame)` when
    /// the line was blank and at least one `data:` line had accumulated.
    pub fn feed_line(&mut self, line: &str) -> Option<RawSseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        if line.starts_with(':') {
            return None; // comment
        }

        if let Some(rest) = line.strip_prefix("event:") {
            self.event_type = Some(strip_leading_space(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(strip_leading_space(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("id:") {
            self.id = Some(strip_leading_space(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("retry:") {
            self.retry_ms = strip_leading_space(rest).parse::<u64>().ok();
        }

        None
    }

    fn dispatch(&mut self) -> Option<RawSseFrame> {
        if self.data_lines.is_empty() {
            self.event_type = None;
            self.id = None;
            self.retry_ms = None;
            return None;
        }

        let frame = RawSseFrame {
            event_type: self.event_type.take(),
            id: self.id.take(),
            retry_ms: self.retry_ms.take(),
            data_lines: self.data_lines.drain(..).collect(),
        };
        Some(frame)
    }
}

fn strip_leading_space(s: &str) -> &str {
    s.strip_prefix(' ').unwrap_or(s)
}

impl RawSseFrame {
    pub fn retry_hint(&self) -> Option<Duration> {
        self.retry_ms.map(Duration::from_millis)
    }

    /// All `data:` lines joined by `\n`, the generic SSE reading of a
    /// frame's payload. This crate's own wire format never needs this —
    /// use [`decode_frame`] instead — it exists for callers treating the
    /// parser as a plain SSE reader.
    pub fn joined_data(&self) -> String {
        self.data_lines.join("\n")
    }
}

/// Split a buffer of newly-arrived bytes into complete lines plus any
/// trailing partial line, feeding complete lines into `parser` and
/// collecting dispatched frames.
pub fn feed_bytes(parser: &mut SseFrameParser, buffer: &mut String, chunk: &str) -> Vec<RawSseFrame> {
    buffer.push_str(chunk);
    let mut frames = Vec::new();

    loop {
        let Some(pos) = buffer.find('\n') else { break };
        let line = buffer[..pos].trim_end_matches('\r').to_string();
        *buffer = buffer[pos + 1..].to_string();
        if let Some(frame) = parser.feed_line(&line) {
            frames.push(frame);
        }
    }

    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn single_chunk(payload: &str) -> StreamChunk {
        StreamChunk {
            payload: bytes::Bytes::from(payload.to_string()),
            event_type: "A".to_string(),
            event_id: "evt-1".to_string(),
            retry_hint: None,
            compressed: false,
            sequence_num: 0,
            chunk_index: 0,
            total_chunks: 1,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn round_trip_single_chunk() {
        let chunk = single_chunk(r#"{"type":"A","payload":"hi"}"#);
        let wire = encode(&chunk);

        let mut parser = SseFrameParser::new();
        let mut frame = None;
        for line in wire.split('\n') {
            if let Some(f) = parser.feed_line(line) {
                frame = Some(f);
            }
        }
        let frame = frame.expect("frame dispatched");
        assert_eq!(frame.event_type.as_deref(), Some("A"));
        assert_eq!(frame.id.as_deref(), Some("evt-1"));
        assert_eq!(frame.joined_data(), r#"{"type":"A","payload":"hi"}"#);
    }

    #[test]
    fn multiline_data_is_joined_with_newline() {
        let mut parser = SseFrameParser::new();
        parser.feed_line("data: line one");
        parser.feed_line("data: line two");
        let frame = parser.feed_line("").unwrap();
        assert_eq!(frame.joined_data(), "line one\nline two");
    }

    #[test]
    fn comment_lines_are_ignored() {
        let mut parser = SseFrameParser::new();
        assert!(parser.feed_line(": this is a comment").is_none());
        parser.feed_line("data: payload");
        let frame = parser.feed_line("").unwrap();
        assert_eq!(frame.joined_data(), "payload");
    }

    #[test]
    fn compressed_envelope_round_trips() {
        let mut chunk = single_chunk("");
        chunk.compressed = true;
        chunk.payload = bytes::Bytes::from_static(b"hello world");
        let wire = encode(&chunk);
        let data_line = wire
            .lines()
            .find(|l| l.starts_with("data:"))
            .unwrap()
            .trim_start_matches("data: ");
        let (decoded, compressed) = decode_payload(data_line);
        assert!(compressed);
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn decode_frame_reassembles_multi_chunk_metadata() {
        let chunks = vec![
            StreamChunk {
                payload: bytes::Bytes::from_static(b"first-"),
                event_type: "A".to_string(),
                event_id: "evt-9".to_string(),
                retry_hint: None,
                compressed: false,
                sequence_num: 7,
                chunk_index: 0,
                total_chunks: 2,
                timestamp: Instant::now(),
            },
            StreamChunk {
                payload: bytes::Bytes::from_static(b"second"),
                event_type: "A".to_string(),
                event_id: "evt-9".to_string(),
                retry_hint: None,
                compressed: false,
                sequence_num: 7,
                chunk_index: 1,
                total_chunks: 2,
                timestamp: Instant::now(),
            },
        ];

        let mut decoded = Vec::new();
        for chunk in &chunks {
            let wire = encode(chunk);
            let mut parser = SseFrameParser::new();
            let mut frame = None;
            for line in wire.split('\n') {
                if let Some(f) = parser.feed_line(line) {
                    frame = Some(f);
                }
            }
            decoded.push(decode_frame(&frame.expect("frame dispatched")).expect("decodes"));
        }

        assert_eq!(decoded[0].event_id, "evt-9");
        assert_eq!(decoded[1].event_id, "evt-9");
        assert_eq!(decoded[0].sequence_num, 7);
        assert_eq!(decoded[1].sequence_num, 7);
        assert_eq!(decoded[0].total_chunks, 2);
        assert_eq!(decoded[0].chunk_index, 0);
        assert_eq!(decoded[1].chunk_index, 1);

        let reassembled: Vec<u8> = decoded.iter().flat_map(|d| d.payload.clone()).collect();
        assert_eq!(reassembled, b"first-second");
    }

    #[test]
    fn decode_frame_defaults_single_chunk_metadata() {
        let chunk = single_chunk("hello");
        let wire = encode(&chunk);
        let mut parser = SseFrameParser::new();
        let mut frame = None;
        for line in wire.split('\n') {
            if let Some(f) = parser.feed_line(line) {
                frame = Some(f);
            }
        }
        let decoded = decode_frame(&frame.expect("frame dispatched")).expect("decodes");
        assert_eq!(decoded.chunk_index, 0);
        assert_eq!(decoded.total_chunks, 1);
        assert_eq!(decoded.event_id, "evt-1");
        assert_eq!(decoded.payload, b"hello");
    }
}
