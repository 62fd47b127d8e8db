//! # packet-bridge
//!
//! Typed, compressed packets over publish/subscribe channels.
//!
//! Callers define packet types that write and read their own fields through a
//! compact big-endian codec, register one handler per packet type, and send
//! packets without waiting on the network.
//!
//! ## Architecture
//!
//! - **Codec**: tagless binary writer/reader ([`codec`])
//! - **Routing**: one handler per `"<channel>:<name>"` ([`handler`])
//! - **Dispatch**: encode/compress/publish and decompress/decode/handle on a
//!   small worker pool ([`dispatch`], [`pool`])
//! - **Transport**: Redis pub/sub or an in-process broker ([`transport`])
//!
//! ## Example
//!
//! ```
//! use packet_bridge::codec::{PacketReader, PacketWriter};
//! use packet_bridge::error::CodecError;
//! use packet_bridge::packet::{Packet, PacketInfo};
//! use packet_bridge::transport::MemoryBroker;
//! use packet_bridge::Bridge;
//!
//! #[derive(Default)]
//! struct Greeting {
//!     text: Option<String>,
//! }
//!
//! impl Packet for Greeting {
//!     const INFO: PacketInfo = PacketInfo::new("greeting");
//!
//!     fn write(&self, buf: &mut PacketWriter) {
//!         buf.write_nullable_string(self.text.as_deref());
//!     }
//!
//!     fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), CodecError> {
//!         self.text = buf.read_string()?;
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> packet_bridge::Result<()> {
//!     let broker = MemoryBroker::new();
//!     let bridge = Bridge::builder("lobby").build_memory(&broker)?;
//!
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!     bridge.register_packet(move |greeting: Greeting| {
//!         let tx = tx.clone();
//!         async move {
//!             let _ = tx.send(greeting.text);
//!             Ok(())
//!         }
//!     })?;
//!
//!     bridge.send_packet(Greeting { text: Some("hi".into()) })?;
//!     assert_eq!(rx.recv().await.flatten().as_deref(), Some("hi"));
//!
//!     bridge.shutdown();
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod codec;
pub mod compression;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod packet;
pub mod pool;
pub mod transport;

pub use bridge::{Bridge, BridgeBuilder};
pub use codec::{PacketEnum, PacketReader, PacketWriter};
pub use config::BridgeConfig;
pub use dispatch::DispatchStats;
pub use error::{CodecError, PacketError, Result};
pub use handler::{HandlerResult, Registration};
pub use packet::{Packet, PacketInfo};
