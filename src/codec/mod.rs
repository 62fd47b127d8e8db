//! Codec module - binary encoding of packet bodies.
//!
//! - [`PacketWriter`] - append-only, chained `write_*` calls
//! - [`PacketReader`] - sequential `read_*` calls in the same order
//!
//! # Wire format
//!
//! All integers and floats are big-endian and fixed width. Strings and enum
//! names are a u16 byte length followed by UTF-8. Strings additionally carry a
//! leading presence boolean. UUIDs are two u64 halves, most significant first.
//! There are no field tags, so a packet's `read` must call the reader in the
//! exact order its `write` called the writer.
//!
//! # Example
//!
//! ```
//! use packet_bridge::codec::{PacketReader, PacketWriter};
//!
//! let mut writer = PacketWriter::new();
//! writer.write_string("hello").write_int(42);
//! let bytes = writer.finish().unwrap();
//!
//! let mut reader = PacketReader::new(&bytes);
//! assert_eq!(reader.read_string().unwrap().as_deref(), Some("hello"));
//! assert_eq!(reader.read_int().unwrap(), 42);
//! ```

mod reader;
mod writer;

pub use reader::PacketReader;
pub use writer::PacketWriter;

/// An enum that travels on the wire by its symbolic name.
///
/// ```
/// use packet_bridge::codec::PacketEnum;
///
/// #[derive(Debug, PartialEq)]
/// enum Rank {
///     Member,
///     Admin,
/// }
///
/// impl PacketEnum for Rank {
///     fn name(&self) -> &'static str {
///         match self {
///             Rank::Member => "MEMBER",
///             Rank::Admin => "ADMIN",
///         }
///     }
///
///     fn from_name(name: &str) -> Option<Self> {
///         match name {
///             "MEMBER" => Some(Rank::Member),
///             "ADMIN" => Some(Rank::Admin),
///             _ => None,
///         }
///     }
/// }
///
/// assert_eq!(Rank::from_name(Rank::Admin.name()), Some(Rank::Admin));
/// ```
pub trait PacketEnum: Sized {
    /// Symbolic name written to the wire.
    fn name(&self) -> &'static str;

    /// Inverse of [`name`](Self::name). `None` for names this build does not know.
    fn from_name(name: &str) -> Option<Self>;
}
