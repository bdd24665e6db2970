//! Optional gzip/deflate compression (§4.1.5, §4.5).
//!
//! Grounded on `saarms5-Rust_Micro_Services/crates/telemetry/src/streaming.rs`'s
//! `GzEncoder`/`CompressionFailed` pattern: compression failure is
//! non-fatal — the uncompressed payload is emitted instead and an error
//! counter increments.

use crate::config::CompressionType;
use flate2::write::{GzEncoder, ZlibEncoder};
use flate2::Compression;
use std::io::Write;

/// Compress `payload` per `compression_type`/`level` if it meets
/// `min_size`. Returns `(bytes, compressed)` — `compressed` is `false`
/// both when compression was skipped (payload too small, or
/// `CompressionType::None`) and when it failed.
pub fn maybe_compress(
    payload: &[u8],
    compression_type: &CompressionType,
    level: u32,
    min_size: usize,
) -> (Vec<u8>, bool) {
    if *compression_type == CompressionType::None || payload.len() < min_size {
        return (payload.to_vec(), false);
    }

    match compress(payload, compression_type, level) {
        Ok(compressed) => (compressed, true),
        Err(err) => {
            #[cfg(feature = "tracing")]
            tracing::warn!(error = %err, "compression failed, emitting uncompressed payload");
            #[cfg(not(feature = "tracing"))]
            let _ = err;
            (payload.to_vec(), false)
        }
    }
}

fn compress(
    payload: &[u8],
    compression_type: &CompressionType,
    level: u32,
) -> std::io::Result<Vec<u8>> {
    let level = Compression::new(level.min(9));
    match compression_type {
        CompressionType::Gzip => {
            let mut encoder = GzEncoder::new(Vec::new(), level);
            encoder.write_all(payload)?;
            encoder.finish()
        }
        CompressionType::Deflate => {
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(payload)?;
            encoder.finish()
        }
        CompressionType::None => Ok(payload.to_vec()),
    }
}

/// Decompress a payload previously produced by [`maybe_compress`].
pub fn decompress(payload: &[u8], compression_type: &CompressionType) -> std::io::Result<Vec<u8>> {
    use std::io::Read;
    let mut out = Vec::new();
    match compression_type {
        CompressionType::Gzip => {
            flate2::read::GzDecoder::new(payload).read_to_end(&mut out)?;
        }
        CompressionType::Deflate => {
            flate2::read::ZlibDecoder::new(payload).read_to_end(&mut out)?;
        }
        CompressionType::None => out.extend_from_slice(payload),
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn below_threshold_is_not_compressed() {
        let (bytes, compressed) = maybe_compress(b"tiny", &CompressionType::Gzip, 6, 1024);
        assert!(!compressed);
        assert_eq!(bytes, b"tiny");
    }

    #[test]
    fn gzip_round_trips_above_threshold() {
        let payload = vec![b'a'; 2048];
        let (compressed_bytes, compressed) =
            maybe_compress(&payload, &CompressionType::Gzip, 6, 1024);
        assert!(compressed);
        assert!(compressed_bytes.len() < payload.len());

        let restored = decompress(&compressed_bytes, &CompressionType::Gzip).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn deflate_round_trips() {
        let payload = vec![b'b'; 2048];
        let (compressed_bytes, compressed) =
            maybe_compress(&payload, &CompressionType::Deflate, 6, 1024);
        assert!(compressed);
        let restored = decompress(&compressed_bytes, &CompressionType::Deflate).unwrap();
        assert_eq!(restored, payload);
    }

    #[test]
    fn none_never_compresses() {
        let payload = vec![b'c'; 4096];
        let (bytes, compressed) = maybe_compress(&payload, &CompressionType::None, 6, 0);
        assert!(!compressed);
        assert_eq!(bytes, payload);
    }
}
