//! Append-only packet writer.
//!
//! Every `write_*` call appends one value and returns `&mut Self` so packet
//! bodies can be written as a single chain:
//!
//! ```
//! use packet_bridge::codec::PacketWriter;
//!
//! let mut writer = PacketWriter::new();
//! writer.write_int(42).write_string("hello").write_bool(true);
//! let bytes = writer.finish().unwrap();
//! assert_eq!(bytes.len(), 4 + 1 + 2 + 5 + 1);
//! ```
//!
//! Strings longer than the u16 length prefix cannot be framed. Instead of
//! breaking the chain with a `Result` per call, the writer remembers the first
//! such failure and [`PacketWriter::finish`] reports it.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use uuid::Uuid;

use super::PacketEnum;
use crate::error::CodecError;

/// Initial capacity; most packets are a handful of fields.
const INITIAL_CAPACITY: usize = 64;

/// Append-only writer producing a packet body.
#[derive(Debug)]
pub struct PacketWriter {
    buf: BytesMut,
    error: Option<CodecError>,
}

impl PacketWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::with_capacity(INITIAL_CAPACITY)
    }

    /// Create an empty writer with a pre-sized buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
            error: None,
        }
    }

    /// Number of bytes written so far.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True if nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn write_byte(&mut self, value: i8) -> &mut Self {
        self.buf.put_i8(value);
        self
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.buf.put_u8(value as u8);
        self
    }

    #[inline]
    pub fn write_short(&mut self, value: i16) -> &mut Self {
        self.buf.put_i16(value);
        self
    }

    #[inline]
    pub fn write_int(&mut self, value: i32) -> &mut Self {
        self.buf.put_i32(value);
        self
    }

    #[inline]
    pub fn write_long(&mut self, value: i64) -> &mut Self {
        self.buf.put_i64(value);
        self
    }

    #[inline]
    pub fn write_float(&mut self, value: f32) -> &mut Self {
        self.buf.put_f32(value);
        self
    }

    #[inline]
    pub fn write_double(&mut self, value: f64) -> &mut Self {
        self.buf.put_f64(value);
        self
    }

    /// Write a present string: `true`, u16 byte length, UTF-8 bytes.
    pub fn write_string(&mut self, value: &str) -> &mut Self {
        self.write_bool(true);
        self.put_utf(value);
        self
    }

    /// Write a string that may be absent. `None` is a single `false` flag.
    pub fn write_nullable_string(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            Some(s) => self.write_string(s),
            None => self.write_bool(false),
        }
    }

    /// Presence flag followed by [`write_string`](Self::write_string).
    ///
    /// Pairs with `PacketReader::read_optional_string`.
    pub fn write_optional_string(&mut self, value: Option<&str>) -> &mut Self {
        self.write_optional(value, |w, s| {
            w.write_string(s);
        })
    }

    /// Write a UUID as two big-endian i64 halves, most significant first.
    pub fn write_uuid(&mut self, value: &Uuid) -> &mut Self {
        let (msb, lsb) = value.as_u64_pair();
        self.buf.put_u64(msb);
        self.buf.put_u64(lsb);
        self
    }

    pub fn write_optional_uuid(&mut self, value: Option<&Uuid>) -> &mut Self {
        self.write_optional(value, |w, id| {
            w.write_uuid(id);
        })
    }

    /// Write an enum by its symbolic name (no presence flag).
    pub fn write_enum<E: PacketEnum>(&mut self, value: &E) -> &mut Self {
        self.put_utf(value.name());
        self
    }

    /// Presence flag, then `write` for the value when present.
    pub fn write_optional<T, F>(&mut self, value: Option<T>, write: F) -> &mut Self
    where
        F: FnOnce(&mut Self, T),
    {
        match value {
            Some(v) => {
                self.write_bool(true);
                write(self, v);
            }
            None => {
                self.write_bool(false);
            }
        }
        self
    }

    /// Embed any serde value as a u32-length-prefixed MessagePack blob.
    ///
    /// Structs are written with field names (`to_vec_named`).
    pub fn write_msgpack<T: Serialize + ?Sized>(&mut self, value: &T) -> &mut Self {
        match rmp_serde::to_vec_named(value) {
            Ok(encoded) => match u32::try_from(encoded.len()) {
                Ok(len) => {
                    self.buf.put_u32(len);
                    self.buf.put_slice(&encoded);
                }
                Err(_) => self.fail(CodecError::BlobTooLong(encoded.len())),
            },
            Err(e) => self.fail(e.into()),
        }
        self
    }

    /// Consume the writer and return the encoded body.
    ///
    /// # Errors
    ///
    /// Returns the first failure recorded by a `write_*` call.
    pub fn finish(self) -> Result<Bytes, CodecError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.buf.freeze()),
        }
    }

    /// u16 length prefix plus UTF-8 bytes.
    fn put_utf(&mut self, value: &str) {
        let bytes = value.as_bytes();
        match u16::try_from(bytes.len()) {
            Ok(len) => {
                self.buf.put_u16(len);
                self.buf.put_slice(bytes);
            }
            Err(_) => self.fail(CodecError::StringTooLong(bytes.len())),
        }
    }

    fn fail(&mut self, error: CodecError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }
}

impl Default for PacketWriter {
    fn default() -> Self {
        Self::new()
    }
}
