//! Bridge facade and builder.
//!
//! A [`Bridge`] owns one dispatcher, one subscriber connection and one command
//! handle. The [`BridgeBuilder`] collects tuning and then either connects to
//! Redis or assembles the bridge over any [`Publisher`]/[`Subscriber`] pair.
//!
//! # Example
//!
//! ```ignore
//! use packet_bridge::Bridge;
//!
//! #[tokio::main]
//! async fn main() -> packet_bridge::Result<()> {
//!     let bridge = Bridge::create("localhost", 6379, "secret", "lobby").await?;
//!
//!     bridge.register_packet(|joined: PlayerJoined| async move {
//!         tracing::info!(player = ?joined.name, "joined");
//!         Ok(())
//!     })?;
//!
//!     bridge.send_packet(PlayerJoined::new("ada"))?;
//!     bridge.shutdown();
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::Dispatch;

use crate::config::BridgeConfig;
use crate::dispatch::{DispatchStats, Dispatcher};
use crate::error::{PacketError, Result};
use crate::handler::{HandlerRegistry, HandlerResult, Registration};
use crate::packet::Packet;
use crate::transport::redis::connect_commands;
use crate::transport::{
    MemoryBroker, MessageListener, Publisher, RedisEndpoint, RedisPublisher, RedisSubscriber,
    Subscriber,
};

/// Builder for a [`Bridge`].
pub struct BridgeBuilder {
    base_channel: String,
    config: BridgeConfig,
    log: Option<Dispatch>,
    runtime: Option<Handle>,
}

impl BridgeBuilder {
    /// Start a builder for packets on `base_channel`.
    pub fn new(base_channel: impl Into<String>) -> Self {
        Self {
            base_channel: base_channel.into(),
            config: BridgeConfig::default(),
            log: None,
            runtime: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// Deadline for each send, from submission to publish.
    ///
    /// Default: 5 seconds
    pub fn send_timeout(mut self, timeout: Duration) -> Self {
        self.config.send_timeout = timeout;
        self
    }

    /// zstd level for outbound payloads.
    ///
    /// Default: 3
    pub fn compression_level(mut self, level: i32) -> Self {
        self.config.compression_level = level;
        self
    }

    /// Workers kept alive while idle.
    ///
    /// Default: 1
    pub fn core_workers(mut self, workers: usize) -> Self {
        self.config.core_workers = workers;
        self
    }

    /// Ceiling on concurrent workers.
    ///
    /// Default: 2
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.config.max_workers = workers;
        self
    }

    /// Idle time before an extra worker exits.
    ///
    /// Default: 30 seconds
    pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
        self.config.keep_alive = keep_alive;
        self
    }

    /// Reject inbound payloads that inflate past `bytes`.
    ///
    /// Default: 16 MiB
    pub fn max_decompressed_size(mut self, bytes: usize) -> Self {
        self.config.max_decompressed_size = bytes;
        self
    }

    /// Subscriber that every bridge task logs through.
    ///
    /// Defaults to the dispatcher current when the bridge is built.
    pub fn log_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.log = Some(dispatch);
        self
    }

    /// Runtime the worker pool spawns on.
    ///
    /// Defaults to the runtime current when the bridge is built.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.base_channel.is_empty() {
            return Err(PacketError::Configuration(
                "base channel must not be empty".to_string(),
            ));
        }
        self.config.validate()
    }

    fn resolve_runtime(&self) -> Result<Handle> {
        match &self.runtime {
            Some(runtime) => Ok(runtime.clone()),
            None => Handle::try_current().map_err(|e| {
                PacketError::Configuration(format!("bridge needs a tokio runtime: {}", e))
            }),
        }
    }

    /// Connect to Redis and build the bridge.
    ///
    /// Opens three connections: publish, pub/sub and commands.
    pub async fn connect(self, endpoint: RedisEndpoint) -> Result<Bridge> {
        self.validate()?;
        let client = endpoint.client()?;
        let runtime = self.resolve_runtime()?;

        let publisher = RedisPublisher::connect(&client).await?;
        let subscriber = RedisSubscriber::connect(&client, runtime).await?;
        let commands = connect_commands(&client).await?;

        tracing::debug!(
            address = %endpoint.address,
            port = endpoint.port,
            base_channel = %self.base_channel,
            "connected to redis"
        );

        self.build_with(publisher, subscriber, commands)
    }

    /// Build over an in-process broker. The broker doubles as the command
    /// handle.
    pub fn build_memory(self, broker: &MemoryBroker) -> Result<Bridge<MemoryBroker>> {
        self.build_with(broker.publisher(), broker.subscriber(), broker.clone())
    }

    /// Build over any transport.
    ///
    /// # Errors
    ///
    /// `Configuration` on an empty base channel, invalid tuning, or when no
    /// runtime was given and none is current.
    pub fn build_with<P, S, C>(self, publisher: P, subscriber: S, commands: C) -> Result<Bridge<C>>
    where
        P: Publisher,
        S: Subscriber,
    {
        self.validate()?;

        let runtime = self.resolve_runtime()?;
        let log = self
            .log
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone));

        let registry = Arc::new(HandlerRegistry::new(self.base_channel));
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(publisher),
            &self.config,
            runtime,
            log.clone(),
        )?;

        Ok(Bridge {
            dispatcher: Arc::new(dispatcher),
            subscriber: Box::new(subscriber),
            commands: Mutex::new(Some(commands)),
            log,
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Typed packet bridge over a pub/sub transport.
///
/// `C` is the command handle exposed through
/// [`execute_operation`](Self::execute_operation): a blocking
/// [`redis::Connection`] for Redis bridges.
pub struct Bridge<C = redis::Connection> {
    dispatcher: Arc<Dispatcher>,
    subscriber: Box<dyn Subscriber>,
    /// `None` once shut down.
    commands: Mutex<Option<C>>,
    log: Dispatch,
    shut_down: AtomicBool,
}

impl Bridge {
    /// Connect to Redis with default tuning.
    ///
    /// # Errors
    ///
    /// `Configuration` on an empty address, zero port or empty base channel.
    /// Connection failures surface as `Redis`.
    pub async fn create(
        address: impl Into<String>,
        port: u16,
        password: impl Into<String>,
        base_channel: impl Into<String>,
    ) -> Result<Self> {
        BridgeBuilder::new(base_channel)
            .connect(RedisEndpoint::new(address, port, password))
            .await
    }

    /// Create a new bridge builder.
    pub fn builder(base_channel: impl Into<String>) -> BridgeBuilder {
        BridgeBuilder::new(base_channel)
    }
}

impl<C> Bridge<C> {
    /// Assemble a bridge over any transport.
    pub fn with_transport<P, S>(
        base_channel: impl Into<String>,
        config: BridgeConfig,
        publisher: P,
        subscriber: S,
        commands: C,
    ) -> Result<Self>
    where
        P: Publisher,
        S: Subscriber,
    {
        BridgeBuilder::new(base_channel)
            .config(config)
            .build_with(publisher, subscriber, commands)
    }

    /// Register a handler for `T`, building blank packets with `T::default`.
    ///
    /// Replaces any handler already on `T`'s channel.
    pub fn register_packet<T, F, Fut>(&self, handler: F) -> Result<Registration>
    where
        T: Packet + Default,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register_packet_with(T::default, handler)
    }

    /// Register a handler for `T` with an explicit factory for blank packets.
    ///
    /// # Errors
    ///
    /// - `Configuration` if `T` has no usable name
    /// - `Shutdown` after [`shutdown`](Self::shutdown)
    /// - transport errors from the subscribe request
    pub fn register_packet_with<T, M, F, Fut>(&self, factory: M, handler: F) -> Result<Registration>
    where
        T: Packet,
        M: Fn() -> T + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(PacketError::Shutdown);
        }

        // Subscribe first so a failed request leaves no handler behind.
        let registry = self.dispatcher.registry();
        let channel = registry.channel_for::<T>()?;
        let listener: Arc<dyn MessageListener> = self.dispatcher.clone();
        self.subscriber.subscribe(&channel, listener)?;

        let registration = registry.register(factory, handler)?;

        // Lost a race with shutdown, which may already have cleared the registry.
        if self.is_shutdown() {
            registry.clear();
            return Err(PacketError::Shutdown);
        }

        tracing::dispatcher::with_default(&self.log, || {
            tracing::debug!(
                channel = %registration.channel,
                replaced = registration.replaced,
                "registered packet handler"
            );
        });
        Ok(registration)
    }

    /// Send `packet` on its derived channel. Returns once the send is queued.
    ///
    /// # Errors
    ///
    /// Only `Configuration`. Publish failures and timeouts are logged and
    /// counted in [`stats`](Self::stats).
    pub fn send_packet<P: Packet>(&self, packet: P) -> Result<()> {
        self.dispatcher.send_packet(packet)
    }

    /// Send `packet` on exactly `channel`.
    pub fn send_packet_to<P: Packet>(&self, packet: P, channel: &str) -> Result<()> {
        self.dispatcher.send_packet_to(packet, channel)
    }

    /// Run `operation` against the command handle and return its result.
    ///
    /// Blocks the calling thread for as long as `operation` does. From async
    /// code, call it inside `tokio::task::spawn_blocking` or `block_in_place`.
    ///
    /// # Errors
    ///
    /// `Shutdown` after [`shutdown`](Self::shutdown).
    pub fn execute_operation<R, F>(&self, operation: F) -> Result<R>
    where
        F: FnOnce(&mut C) -> R,
    {
        let mut commands = self.commands.lock().unwrap_or_else(PoisonError::into_inner);
        let commands = commands.as_mut().ok_or(PacketError::Shutdown)?;
        Ok(operation(commands))
    }

    /// Channel name `T` is sent and received on.
    pub fn channel_for<T: Packet>(&self) -> Result<String> {
        self.dispatcher.registry().channel_for::<T>()
    }

    pub fn base_channel(&self) -> &str {
        self.dispatcher.registry().base_channel()
    }

    /// Channels that currently have a handler, in no particular order.
    pub fn registered_channels(&self) -> Vec<String> {
        self.dispatcher.registry().channels()
    }

    /// Snapshot of the send/receive counters.
    pub fn stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Close the subscription and the command handle, stop the worker pool
    /// and drop every handler.
    ///
    /// Queued jobs still run, then the publish connection closes. Later sends
    /// are logged and counted as failures. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        self.subscriber.close();
        self.dispatcher.shutdown();
        let commands = self
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        drop(commands);

        tracing::dispatcher::with_default(&self.log, || {
            tracing::debug!(base_channel = %self.base_channel(), "bridge shut down");
        });
    }
}

impl<C> Drop for Bridge<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
