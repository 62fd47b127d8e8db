//! Transport module - the pub/sub seam under the bridge.
//!
//! The dispatch engine only needs two things from a transport: a way to
//! `publish(channel, bytes)` and a way to be told about `message(channel, bytes)`.
//!
//! - [`redis`] - Redis pub/sub with separate publish and subscribe connections
//! - [`memory`] - in-process broker for tests and single-process setups

pub mod memory;
pub mod redis;

use bytes::Bytes;

use crate::error::Result;
use crate::handler::BoxFuture;

pub use self::memory::{MemoryBroker, MemoryPublisher, MemorySubscriber};
pub use self::redis::{RedisEndpoint, RedisPublisher, RedisSubscriber};

/// Outbound side of a transport.
pub trait Publisher: Send + Sync + 'static {
    /// Publish one payload to `channel`.
    ///
    /// The returned future owns everything it needs; callers may drop it to
    /// cancel.
    fn publish(&self, channel: &str, payload: Bytes) -> BoxFuture<'static, Result<()>>;

    /// Release the connection. Later publishes fail with `Transport`.
    /// Idempotent.
    fn close(&self);
}

/// Receiver of inbound messages.
///
/// Called on a transport-owned task or thread. Implementations must return
/// quickly; the dispatcher only enqueues work here.
pub trait MessageListener: Send + Sync + 'static {
    fn on_message(&self, channel: &str, payload: Bytes);
}

/// Inbound side of a transport.
pub trait Subscriber: Send + Sync + 'static {
    /// Route messages on `channel` to `listener`.
    ///
    /// Non-blocking: the subscription request may complete later. Subscribing
    /// the same channel again replaces its listener.
    fn subscribe(&self, channel: &str, listener: std::sync::Arc<dyn MessageListener>)
        -> Result<()>;

    /// Stop delivery and release the connection. Idempotent.
    fn close(&self);
}
