//! zstd framing for packet payloads.
//!
//! Every published payload is a single zstd frame. `zstd::bulk::compress`
//! records the content size in the frame header, so the receiver can size its
//! output buffer from the frame itself. The decoder still refuses to inflate
//! past a configured ceiling.

use std::io::Read;

use crate::error::{PacketError, Result};

/// Default zstd level.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Default ceiling for a decompressed packet body (16 MiB).
pub const DEFAULT_MAX_DECOMPRESSED_SIZE: usize = 16 * 1024 * 1024;

/// Compress a packet body into one zstd frame.
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    zstd::bulk::compress(data, level)
        .map_err(|e| PacketError::Compression(format!("zstd compress: {}", e)))
}

/// Decompress one zstd frame, refusing output larger than `max_size`.
pub fn decompress(data: &[u8], max_size: usize) -> Result<Vec<u8>> {
    let decoder = zstd::stream::read::Decoder::new(data)
        .map_err(|e| PacketError::Compression(format!("zstd decoder: {}", e)))?;

    // Read one byte past the ceiling to detect oversized frames.
    let mut out = Vec::new();
    decoder
        .take((max_size as u64).saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| PacketError::Compression(format!("zstd decompress: {}", e)))?;

    if out.len() > max_size {
        return Err(PacketError::Compression(format!(
            "decompressed payload exceeds {} bytes",
            max_size
        )));
    }

    Ok(out)
}
