//! Packet contract and channel naming.
//!
//! A packet type declares a static [`PacketInfo`] and writes/reads its own
//! fields in a fixed order.
//!
//! # Example
//!
//! ```
//! use packet_bridge::codec::{PacketReader, PacketWriter};
//! use packet_bridge::error::CodecError;
//! use packet_bridge::packet::{Packet, PacketInfo};
//!
//! #[derive(Default)]
//! struct Login {
//!     user: Option<String>,
//!     attempts: i32,
//! }
//!
//! impl Packet for Login {
//!     const INFO: PacketInfo = PacketInfo::new("login").with_channel("auth");
//!
//!     fn write(&self, buf: &mut PacketWriter) {
//!         buf.write_nullable_string(self.user.as_deref())
//!             .write_int(self.attempts);
//!     }
//!
//!     fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), CodecError> {
//!         self.user = buf.read_string()?;
//!         self.attempts = buf.read_int()?;
//!         Ok(())
//!     }
//! }
//!
//! assert_eq!(Login::INFO.channel_name("base").unwrap(), "auth:login");
//! ```

use crate::codec::{PacketReader, PacketWriter};
use crate::error::{CodecError, PacketError, Result};

/// Separator between channel and packet name.
pub const CHANNEL_SEPARATOR: char = ':';

/// Static naming metadata for a packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketInfo {
    /// Logical packet name, unique within its channel.
    pub name: &'static str,
    /// Channel override. `None` (or empty) means the bridge's base channel.
    pub channel: Option<&'static str>,
}

impl PacketInfo {
    /// Packet published under the bridge's base channel.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            channel: None,
        }
    }

    /// Publish under `channel` instead of the base channel.
    pub const fn with_channel(self, channel: &'static str) -> Self {
        Self {
            name: self.name,
            channel: Some(channel),
        }
    }

    /// Resolve `"<channel-or-base>:<name>"`.
    ///
    /// # Errors
    ///
    /// `Configuration` if the name is empty or contains the separator.
    pub fn channel_name(&self, base_channel: &str) -> Result<String> {
        if self.name.is_empty() {
            return Err(PacketError::Configuration(
                "packet type declares no name".to_string(),
            ));
        }
        if self.name.contains(CHANNEL_SEPARATOR) {
            return Err(PacketError::Configuration(format!(
                "packet name {:?} must not contain {:?}",
                self.name, CHANNEL_SEPARATOR
            )));
        }

        let prefix = match self.channel {
            Some(channel) if !channel.is_empty() => channel,
            _ => base_channel,
        };

        Ok(format!("{}{}{}", prefix, CHANNEL_SEPARATOR, self.name))
    }
}

/// A message that can be sent through the bridge.
///
/// `write` and `read` must visit the same fields in the same order.
pub trait Packet: Send + 'static {
    /// Naming metadata used to derive the channel.
    const INFO: PacketInfo;

    /// Serialize this packet's fields.
    fn write(&self, buf: &mut PacketWriter);

    /// Populate this (blank) packet from `buf`.
    fn read(&mut self, buf: &mut PacketReader<'_>) -> std::result::Result<(), CodecError>;
}

/// Encode a packet into its uncompressed body.
pub fn encode<P: Packet>(packet: &P) -> Result<bytes::Bytes> {
    let mut writer = PacketWriter::new();
    packet.write(&mut writer);
    Ok(writer.finish()?)
}

/// Decode a body into a packet built by `factory`.
pub fn decode<P, F>(data: &[u8], factory: F) -> Result<P>
where
    P: Packet,
    F: FnOnce() -> P,
{
    let mut packet = factory();
    let mut reader = PacketReader::new(data);
    packet.read(&mut reader)?;
    Ok(packet)
}
