//! Handler module - per-channel packet handlers.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps channel names to handlers
//! - [`Handler`] - type-erased decode-then-call entry
//!
//! # Example
//!
//! ```ignore
//! use packet_bridge::handler::HandlerRegistry;
//!
//! let registry = HandlerRegistry::new("lobby");
//!
//! // Blank instances come from the factory, then `Packet::read` fills them
//! registry.register(PlayerJoined::default, |packet: PlayerJoined| async move {
//!     tracing::info!(player = %packet.name, "joined");
//!     Ok(())
//! })?;
//! ```

mod registry;

pub use registry::{
    BoxFuture, Handler, HandlerRegistry, HandlerResult, Registration, TypedHandler,
};
