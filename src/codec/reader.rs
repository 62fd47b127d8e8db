//! Sequential packet reader.
//!
//! Reads must mirror the writer's call sequence exactly; the body carries no
//! field tags. Running off the end of the buffer fails the decode, while a
//! string that is not UTF-8 or an enum name with no matching variant only
//! yields `None` for that field.

use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::PacketEnum;
use crate::error::CodecError;

/// Read-only cursor over an encoded packet body.
#[derive(Debug)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes consumed so far.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// True once every byte has been consumed.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_byte(&mut self) -> Result<i8, CodecError> {
        Ok(self.take_array::<1>()?[0] as i8)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        match self.take_array::<1>()?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CodecError::InvalidBool(other)),
        }
    }

    pub fn read_short(&mut self) -> Result<i16, CodecError> {
        Ok(i16::from_be_bytes(self.take_array()?))
    }

    pub fn read_int(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_be_bytes(self.take_array()?))
    }

    pub fn read_long(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_be_bytes(self.take_array()?))
    }

    pub fn read_float(&mut self) -> Result<f32, CodecError> {
        Ok(f32::from_be_bytes(self.take_array()?))
    }

    pub fn read_double(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_be_bytes(self.take_array()?))
    }

    /// Read a string written by `write_string` or `write_nullable_string`.
    ///
    /// `Ok(None)` when the presence flag is unset or the body is not UTF-8.
    pub fn read_string(&mut self) -> Result<Option<String>, CodecError> {
        if !self.read_bool()? {
            return Ok(None);
        }
        self.take_utf()
    }

    /// Read a string written by `write_optional_string`.
    pub fn read_optional_string(&mut self) -> Result<Option<String>, CodecError> {
        Ok(self.read_optional(|r| r.read_string())?.flatten())
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, CodecError> {
        let msb = u64::from_be_bytes(self.take_array()?);
        let lsb = u64::from_be_bytes(self.take_array()?);
        Ok(Uuid::from_u64_pair(msb, lsb))
    }

    pub fn read_optional_uuid(&mut self) -> Result<Option<Uuid>, CodecError> {
        self.read_optional(|r| r.read_uuid())
    }

    /// Read an enum by symbolic name. Unknown names resolve to `None`.
    pub fn read_enum<E: PacketEnum>(&mut self) -> Result<Option<E>, CodecError> {
        Ok(self.take_utf()?.and_then(|name| E::from_name(&name)))
    }

    /// Presence flag, then `read` when present.
    pub fn read_optional<T, F>(&mut self, read: F) -> Result<Option<T>, CodecError>
    where
        F: FnOnce(&mut Self) -> Result<T, CodecError>,
    {
        if self.read_bool()? {
            read(self).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Read a value embedded with `write_msgpack`.
    pub fn read_msgpack<T: DeserializeOwned>(&mut self) -> Result<T, CodecError> {
        let len = u32::from_be_bytes(self.take_array()?) as usize;
        let body = self.take(len)?;
        Ok(rmp_serde::from_slice(body)?)
    }

    /// u16 length prefix plus UTF-8 bytes. Invalid UTF-8 is consumed and
    /// reported as `None`.
    fn take_utf(&mut self) -> Result<Option<String>, CodecError> {
        let len = u16::from_be_bytes(self.take_array()?) as usize;
        let body = self.take(len)?;
        Ok(std::str::from_utf8(body).ok().map(str::to_owned))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let remaining = self.remaining();
        if n > remaining {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                remaining,
            });
        }
        let data = self.data;
        let slice = &data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}
