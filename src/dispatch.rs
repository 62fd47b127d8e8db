//! Dispatch engine: the send and receive pipelines.
//!
//! ```text
//! send:    packet ─► encode ─► zstd ─► Publisher::publish      (pool job, deadline)
//! receive: on_message ─► lookup ─► unzstd ─► factory + read ─► handler   (pool job)
//! ```
//!
//! Neither path reports runtime failures to the caller. They are logged with
//! the channel and counted in [`DispatchStats`]. Only naming mistakes surface,
//! synchronously, as `Configuration` errors.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::Dispatch;

use crate::compression;
use crate::config::BridgeConfig;
use crate::error::{PacketError, Result};
use crate::handler::HandlerRegistry;
use crate::packet::{self, Packet};
use crate::pool::WorkerPool;
use crate::transport::{MessageListener, Publisher};

/// Point-in-time copy of the dispatch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Packets published successfully.
    pub sent: u64,
    /// Sends that failed, timed out or were rejected after shutdown.
    pub send_failures: u64,
    /// Inbound messages handed over by the transport.
    pub received: u64,
    /// Inbound messages whose handler completed with `Ok`.
    pub handled: u64,
    /// Inbound messages dropped because no handler owns the channel.
    pub unmatched: u64,
    /// Inbound messages that failed to decompress, decode or handle.
    pub receive_failures: u64,
    /// Pool jobs that panicked.
    pub panicked: u64,
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    send_failures: AtomicU64,
    received: AtomicU64,
    handled: AtomicU64,
    unmatched: AtomicU64,
    receive_failures: AtomicU64,
}

impl Counters {
    #[inline]
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// State shared with pool jobs.
struct Inner {
    registry: Arc<HandlerRegistry>,
    publisher: Arc<dyn Publisher>,
    counters: Counters,
    send_timeout: Duration,
    compression_level: i32,
    max_decompressed_size: usize,
}

impl Inner {
    /// Encode and compress. Runs inside the send job.
    fn prepare<P: Packet>(&self, packet: &P) -> Result<Bytes> {
        let body = packet::encode(packet)?;
        let compressed = compression::compress(&body, self.compression_level)?;
        Ok(Bytes::from(compressed))
    }

    async fn send<P: Packet>(&self, packet: P, channel: String, deadline: Instant) {
        let prepared = self.prepare(&packet);
        drop(packet);

        let result = match prepared {
            Ok(payload) if Instant::now() < deadline => {
                tokio::time::timeout_at(deadline, self.publisher.publish(&channel, payload))
                    .await
                    .unwrap_or_else(|_| Err(self.timed_out(&channel)))
            }
            Ok(_) => Err(self.timed_out(&channel)),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                Counters::bump(&self.counters.sent);
                tracing::trace!(channel = %channel, "packet sent");
            }
            Err(e) => {
                Counters::bump(&self.counters.send_failures);
                tracing::error!(channel = %channel, error = %e, "failed to send packet");
            }
        }
    }

    fn timed_out(&self, channel: &str) -> PacketError {
        PacketError::SendTimeout {
            channel: channel.to_string(),
            timeout: self.send_timeout,
        }
    }

    async fn receive(&self, channel: String, payload: Bytes) {
        let dispatched = self
            .registry
            .dispatch(&channel, &payload, self.max_decompressed_size);
        let future = match dispatched {
            Ok(Some(future)) => future,
            Ok(None) => {
                Counters::bump(&self.counters.unmatched);
                tracing::trace!(channel = %channel, "no handler for channel, dropping message");
                return;
            }
            Err(e) => {
                Counters::bump(&self.counters.receive_failures);
                tracing::error!(channel = %channel, error = %e, "failed to read packet");
                return;
            }
        };

        match future.await {
            Ok(()) => Counters::bump(&self.counters.handled),
            Err(e) => {
                Counters::bump(&self.counters.receive_failures);
                tracing::error!(channel = %channel, error = %e, "packet handler failed");
            }
        }
    }
}

/// Moves packets between a [`HandlerRegistry`], a [`WorkerPool`] and a
/// [`Publisher`].
///
/// Register it with a subscriber as the [`MessageListener`] for every handled
/// channel.
pub struct Dispatcher {
    inner: Arc<Inner>,
    pool: WorkerPool,
}

impl Dispatcher {
    /// Build a dispatcher whose pool runs on `runtime` and logs through `log`.
    pub fn new(
        registry: Arc<HandlerRegistry>,
        publisher: Arc<dyn Publisher>,
        config: &BridgeConfig,
        runtime: Handle,
        log: Dispatch,
    ) -> Result<Self> {
        config.validate()?;
        let pool = WorkerPool::new(config.pool_config(), runtime, log)?;

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                publisher,
                counters: Counters::default(),
                send_timeout: config.send_timeout,
                compression_level: config.compression_level,
                max_decompressed_size: config.max_decompressed_size,
            }),
            pool,
        })
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.inner.registry
    }

    /// Send `packet` on the channel derived from its [`PacketInfo`](crate::packet::PacketInfo).
    ///
    /// # Errors
    ///
    /// `Configuration` if the packet type has no usable name. Everything after
    /// channel resolution is logged and counted instead.
    pub fn send_packet<P: Packet>(&self, packet: P) -> Result<()> {
        let channel = self.inner.registry.channel_for::<P>()?;
        self.submit_send(packet, channel);
        Ok(())
    }

    /// Send `packet` on exactly `channel`, ignoring its declared naming.
    ///
    /// # Errors
    ///
    /// `Configuration` if `channel` is empty.
    pub fn send_packet_to<P: Packet>(&self, packet: P, channel: &str) -> Result<()> {
        if channel.is_empty() {
            return Err(PacketError::Configuration(
                "target channel must not be empty".to_string(),
            ));
        }
        self.submit_send(packet, channel.to_string());
        Ok(())
    }

    fn submit_send<P: Packet>(&self, packet: P, channel: String) {
        // Queue wait counts against the deadline.
        let deadline = Instant::now() + self.inner.send_timeout;
        let inner = self.inner.clone();
        let job_channel = channel.clone();

        let submitted = self
            .pool
            .submit(async move { inner.send(packet, job_channel, deadline).await });

        if let Err(e) = submitted {
            Counters::bump(&self.inner.counters.send_failures);
            tracing::error!(channel = %channel, error = %e, "failed to queue packet");
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DispatchStats {
        let c = &self.inner.counters;
        DispatchStats {
            sent: c.sent.load(Ordering::Relaxed),
            send_failures: c.send_failures.load(Ordering::Relaxed),
            received: c.received.load(Ordering::Relaxed),
            handled: c.handled.load(Ordering::Relaxed),
            unmatched: c.unmatched.load(Ordering::Relaxed),
            receive_failures: c.receive_failures.load(Ordering::Relaxed),
            panicked: self.pool.panicked_jobs() as u64,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Stop the pool and drop every handler. Queued jobs still run, then the
    /// publisher is closed.
    ///
    /// Returns true on the first call.
    pub fn shutdown(&self) -> bool {
        let first = self.pool.shutdown();
        self.inner.registry.clear();
        if first {
            let inner = self.inner.clone();
            self.pool.on_drained(move || {
                inner.publisher.close();
                tracing::debug!("publisher closed");
            });
        }
        first
    }

    pub fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }
}

impl MessageListener for Dispatcher {
    fn on_message(&self, channel: &str, payload: Bytes) {
        Counters::bump(&self.inner.counters.received);

        let inner = self.inner.clone();
        let channel = channel.to_string();
        let job_channel = channel.clone();

        let submitted = self
            .pool
            .submit(async move { inner.receive(job_channel, payload).await });

        if let Err(e) = submitted {
            Counters::bump(&self.inner.counters.receive_failures);
            tracing::debug!(channel = %channel, error = %e, "dropping message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PacketReader, PacketWriter};
    use crate::error::CodecError;
    use crate::packet::PacketInfo;
    use crate::transport::{MemoryBroker, MemorySubscriber, Subscriber};
    use tokio::sync::mpsc;

    #[derive(Default, Debug, PartialEq)]
    struct Score {
        player: Option<String>,
        points: i32,
    }

    impl Packet for Score {
        const INFO: PacketInfo = PacketInfo::new("score");

        fn write(&self, buf: &mut PacketWriter) {
            buf.write_nullable_string(self.player.as_deref())
                .write_int(self.points);
        }

        fn read(&mut self, buf: &mut PacketReader<'_>) -> std::result::Result<(), CodecError> {
            self.player = buf.read_string()?;
            self.points = buf.read_int()?;
            Ok(())
        }
    }

    #[derive(Default)]
    struct Unnamed;

    impl Packet for Unnamed {
        const INFO: PacketInfo = PacketInfo::new("");

        fn write(&self, _buf: &mut PacketWriter) {}

        fn read(&mut self, _buf: &mut PacketReader<'_>) -> std::result::Result<(), CodecError> {
            Ok(())
        }
    }

    fn score(player: &str, points: i32) -> Score {
        Score {
            player: Some(player.to_string()),
            points,
        }
    }

    type Wired = (
        Arc<Dispatcher>,
        mpsc::UnboundedReceiver<Score>,
        MemorySubscriber,
    );

    /// Dispatcher on `broker`, subscribed to its own score channel.
    fn wired(broker: &MemoryBroker, config: &BridgeConfig) -> Wired {
        let registry = Arc::new(HandlerRegistry::new("arena"));
        let dispatcher = Arc::new(
            Dispatcher::new(
                registry.clone(),
                Arc::new(broker.publisher()),
                config,
                Handle::current(),
                Dispatch::none(),
            )
            .unwrap(),
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let reg = registry
            .register(Score::default, move |packet: Score| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(packet);
                    Ok(())
                }
            })
            .unwrap();

        let subscriber = broker.subscriber();
        subscriber.subscribe(&reg.channel, dispatcher.clone()).unwrap();

        (dispatcher, rx, subscriber)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_send_and_receive() {
        let broker = MemoryBroker::new();
        let (dispatcher, mut rx, _sub) = wired(&broker, &BridgeConfig::default());

        dispatcher.send_packet(score("ada", 12)).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, score("ada", 12));

        settle().await;
        let stats = dispatcher.stats();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.received, 1);
        assert_eq!(stats.handled, 1);
        assert_eq!(stats.send_failures, 0);
    }

    #[tokio::test]
    async fn test_unlimited_decompressed_size_still_receives() {
        let broker = MemoryBroker::new();
        let config = BridgeConfig {
            max_decompressed_size: usize::MAX,
            ..BridgeConfig::default()
        };
        assert!(config.validate().is_ok());
        let (dispatcher, mut rx, _sub) = wired(&broker, &config);

        dispatcher.send_packet(score("max", 7)).unwrap();

        assert_eq!(rx.recv().await.unwrap(), score("max", 7));
        settle().await;
        assert_eq!(dispatcher.stats().receive_failures, 0);
        assert_eq!(dispatcher.stats().panicked, 0);
    }

    #[tokio::test]
    async fn test_unnamed_packet_is_configuration_error() {
        let broker = MemoryBroker::new();
        let (dispatcher, _rx, _sub) = wired(&broker, &BridgeConfig::default());

        let err = dispatcher.send_packet(Unnamed).unwrap_err();
        assert!(err.is_configuration());
        assert!(dispatcher.send_packet_to(score("x", 1), "").is_err());
        assert_eq!(broker.published(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_channel_is_counted() {
        let broker = MemoryBroker::new();
        let (dispatcher, _rx, _sub) = wired(&broker, &BridgeConfig::default());

        dispatcher.on_message("arena:unknown", Bytes::from_static(b"whatever"));
        settle().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.unmatched, 1);
        assert_eq!(stats.receive_failures, 0);
    }

    #[tokio::test]
    async fn test_garbage_does_not_block_next_message() {
        let broker = MemoryBroker::new();
        let (dispatcher, mut rx, _sub) = wired(&broker, &BridgeConfig::default());

        dispatcher.on_message("arena:score", Bytes::from_static(b"not zstd"));
        dispatcher.send_packet(score("grace", 99)).unwrap();

        assert_eq!(rx.recv().await.unwrap(), score("grace", 99));
        settle().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.receive_failures, 1);
        assert_eq!(stats.handled, 1);
    }

    #[tokio::test]
    async fn test_truncated_body_is_receive_failure() {
        let broker = MemoryBroker::new();
        let (dispatcher, _rx, _sub) = wired(&broker, &BridgeConfig::default());

        // Valid zstd, but the body stops inside the int.
        let mut writer = PacketWriter::new();
        writer.write_nullable_string(Some("ada")).write_short(1);
        let body = writer.finish().unwrap();
        let payload = compression::compress(&body, 3).unwrap();

        dispatcher.on_message("arena:score", Bytes::from(payload));
        settle().await;

        assert_eq!(dispatcher.stats().receive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_publish_times_out() {
        let broker = MemoryBroker::new();
        let config = BridgeConfig {
            send_timeout: Duration::from_millis(100),
            ..BridgeConfig::default()
        };
        let registry = Arc::new(HandlerRegistry::new("arena"));
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(broker.publisher().with_latency(Duration::from_secs(1))),
            &config,
            Handle::current(),
            Dispatch::none(),
        )
        .unwrap();

        dispatcher.send_packet(score("slow", 1)).unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let stats = dispatcher.stats();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.send_failures, 1);
        assert_eq!(broker.published(), 0);
    }

    #[tokio::test]
    async fn test_send_after_shutdown_is_counted() {
        let broker = MemoryBroker::new();
        let (dispatcher, _rx, _sub) = wired(&broker, &BridgeConfig::default());

        assert!(dispatcher.shutdown());
        assert!(!dispatcher.shutdown());
        assert!(dispatcher.registry().is_empty());

        dispatcher.send_packet(score("late", 0)).unwrap();
        dispatcher.on_message("arena:score", Bytes::new());

        let stats = dispatcher.stats();
        assert_eq!(stats.send_failures, 1);
        assert_eq!(stats.receive_failures, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_publisher_after_queued_sends() {
        let broker = MemoryBroker::new();
        let publisher = broker.publisher();
        let registry = Arc::new(HandlerRegistry::new("arena"));
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(publisher.clone()),
            &BridgeConfig::default(),
            Handle::current(),
            Dispatch::none(),
        )
        .unwrap();

        dispatcher.send_packet(score("last", 1)).unwrap();
        dispatcher.shutdown();
        assert!(!publisher.is_closed());

        for _ in 0..10 {
            settle().await;
        }
        assert!(publisher.is_closed());
        assert_eq!(dispatcher.stats().sent, 1);
        assert_eq!(broker.published(), 1);
    }

    #[tokio::test]
    async fn test_handler_error_is_counted() {
        let broker = MemoryBroker::new();
        let registry = Arc::new(HandlerRegistry::new("arena"));
        let dispatcher = Arc::new(
            Dispatcher::new(
                registry.clone(),
                Arc::new(broker.publisher()),
                &BridgeConfig::default(),
                Handle::current(),
                Dispatch::none(),
            )
            .unwrap(),
        );
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry
            .register(Score::default, move |_packet: Score| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(());
                    Err(PacketError::Transport("downstream unavailable".to_string()))
                }
            })
            .unwrap();

        let body = packet::encode(&score("x", 1)).unwrap();
        let payload = compression::compress(&body, 3).unwrap();
        dispatcher.on_message("arena:score", Bytes::from(payload));

        rx.recv().await.unwrap();
        settle().await;
        assert_eq!(dispatcher.stats().receive_failures, 1);
        assert_eq!(dispatcher.stats().handled, 0);
    }
}
