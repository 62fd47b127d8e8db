//! Error types for packet-bridge.

use std::time::Duration;

use thiserror::Error;

/// Structural failure while encoding or decoding a packet body.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The buffer ended before a fixed-width or length-prefixed value was complete.
    #[error("unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A boolean slot held something other than 0 or 1.
    #[error("invalid boolean byte: {0:#04x}")]
    InvalidBool(u8),

    /// String does not fit the u16 length prefix.
    #[error("string of {0} bytes exceeds the 65535 byte limit")]
    StringTooLong(usize),

    /// Embedded MessagePack value is larger than the u32 length prefix allows.
    #[error("embedded value of {0} bytes exceeds the u32 length prefix")]
    BlobTooLong(usize),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),
}

/// Main error type for all bridge operations.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Misuse detected while registering or sending (bad packet naming, bad config).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Packet body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// zstd compression or decompression failed.
    #[error("compression error: {0}")]
    Compression(String),

    /// Transport-level failure (publish, subscribe, connect).
    #[error("transport error: {0}")]
    Transport(String),

    /// Error reported by the Redis client.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Send task missed its deadline.
    #[error("send to {channel} timed out after {timeout:?}")]
    SendTimeout { channel: String, timeout: Duration },

    /// An inbound message on `channel` could not be turned into a packet.
    #[error("failed to decode packet from {channel}: {source}")]
    Decode {
        channel: String,
        #[source]
        source: Box<PacketError>,
    },

    /// The worker pool has been shut down.
    #[error("bridge is shut down")]
    Shutdown,
}

impl PacketError {
    /// Wrap a receive-side failure with the channel it arrived on.
    pub fn decode(channel: impl Into<String>, source: PacketError) -> Self {
        PacketError::Decode {
            channel: channel.into(),
            source: Box::new(source),
        }
    }

    /// True for errors the caller caused and should fix in code.
    pub fn is_configuration(&self) -> bool {
        matches!(self, PacketError::Configuration(_))
    }
}

/// Result type alias using PacketError.
pub type Result<T> = std::result::Result<T, PacketError>;
