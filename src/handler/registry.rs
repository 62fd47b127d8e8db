//! Handler registry for dispatching inbound packets by channel.
//!
//! Each channel name maps to exactly one handler. Registering a packet type
//! whose channel is already taken replaces the previous handler.
//!
//! # Example
//!
//! ```ignore
//! use packet_bridge::handler::HandlerRegistry;
//!
//! let registry = HandlerRegistry::new("game");
//!
//! registry.register(ChatMessage::default, |msg: ChatMessage| async move {
//!     println!("{}", msg.text);
//!     Ok(())
//! })?;
//!
//! assert!(registry.lookup("game:chat").is_some());
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use crate::compression;
use crate::error::{PacketError, Result};
use crate::packet::{self, Packet};

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Type-erased receive path for one packet type.
pub trait Handler: Send + Sync + 'static {
    /// Decode `body` into a fresh packet and return the callback's future.
    ///
    /// Decode failures are returned before any user code runs.
    fn call(&self, body: &[u8]) -> Result<BoxFuture<'static, HandlerResult>>;
}

/// Wrapper that builds a blank packet, reads it, then calls the callback.
pub struct TypedHandler<T, M, F, Fut>
where
    T: Packet,
    M: Fn() -> T + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    factory: M,
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<T, M, F, Fut> TypedHandler<T, M, F, Fut>
where
    T: Packet,
    M: Fn() -> T + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new typed handler.
    pub fn new(factory: M, handler: F) -> Self {
        Self {
            factory,
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<T, M, F, Fut> Handler for TypedHandler<T, M, F, Fut>
where
    T: Packet,
    M: Fn() -> T + Send + Sync + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, body: &[u8]) -> Result<BoxFuture<'static, HandlerResult>> {
        let packet = packet::decode(body, &self.factory)?;
        Ok(Box::pin((self.handler)(packet)))
    }
}

/// Outcome of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Channel the handler now owns.
    pub channel: String,
    /// True if a previous handler for this channel was replaced.
    pub replaced: bool,
}

/// Registry mapping channel names to handlers.
///
/// Safe to share: registration and lookup can race freely.
pub struct HandlerRegistry {
    /// Channel used for packets that declare no override.
    base_channel: String,
    /// Handlers by channel name.
    handlers: DashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create a new empty registry.
    pub fn new(base_channel: impl Into<String>) -> Self {
        Self {
            base_channel: base_channel.into(),
            handlers: DashMap::new(),
        }
    }

    /// Base channel for packets without an override.
    pub fn base_channel(&self) -> &str {
        &self.base_channel
    }

    /// Channel name for packet type `T`.
    pub fn channel_for<T: Packet>(&self) -> Result<String> {
        T::INFO.channel_name(&self.base_channel)
    }

    /// Register a handler for packet type `T`.
    ///
    /// # Arguments
    ///
    /// * `factory` - Builds the blank instance each inbound message is read into
    /// * `handler` - Called with the decoded packet
    ///
    /// # Errors
    ///
    /// `Configuration` if `T` has no usable name.
    pub fn register<T, M, F, Fut>(&self, factory: M, handler: F) -> Result<Registration>
    where
        T: Packet,
        M: Fn() -> T + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let channel = self.channel_for::<T>()?;
        let typed: Arc<dyn Handler> = Arc::new(TypedHandler::new(factory, handler));
        let replaced = self.insert(channel.clone(), typed);
        Ok(Registration { channel, replaced })
    }

    /// Returns true if a handler was replaced.
    fn insert(&self, channel: String, handler: Arc<dyn Handler>) -> bool {
        self.handlers.insert(channel, handler).is_some()
    }

    /// Current handler for `channel`.
    pub fn lookup(&self, channel: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(channel).map(|entry| entry.value().clone())
    }

    /// True if `channel` has a handler.
    pub fn contains(&self, channel: &str) -> bool {
        self.handlers.contains_key(channel)
    }

    /// Registered channel names, in no particular order.
    pub fn channels(&self) -> Vec<String> {
        self.handlers.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drop every handler. Used on shutdown.
    pub fn clear(&self) {
        self.handlers.clear();
    }

    /// Resolve `channel`, inflate `payload` and decode it into the handler's
    /// future.
    ///
    /// `Ok(None)` when nothing is registered for the channel. Inflate and
    /// decode failures come back as [`PacketError::Decode`] naming the channel.
    pub fn dispatch(
        &self,
        channel: &str,
        payload: &[u8],
        max_decompressed_size: usize,
    ) -> Result<Option<BoxFuture<'static, HandlerResult>>> {
        let Some(handler) = self.lookup(channel) else {
            return Ok(None);
        };

        compression::decompress(payload, max_decompressed_size)
            .and_then(|body| handler.call(&body))
            .map(Some)
            .map_err(|e| PacketError::decode(channel, e))
    }
}
