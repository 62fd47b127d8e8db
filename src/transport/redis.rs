//! Redis pub/sub transport.
//!
//! Uses three connections, one per role:
//!
//! - publish: multiplexed async connection
//! - subscribe: dedicated pub/sub connection, split into a sink (for
//!   SUBSCRIBE requests) and a message stream drained by one task
//! - commands: synchronous connection handed out by `Bridge::execute_operation`
//!
//! Publishing on the subscribe connection would queue publishes behind
//! blocking subscription reads, hence the split.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use dashmap::DashMap;
use redis::AsyncCommands;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use super::{MessageListener, Publisher, Subscriber};
use crate::error::{PacketError, Result};
use crate::handler::BoxFuture;

/// Where and how to reach Redis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisEndpoint {
    pub address: String,
    pub port: u16,
    /// Empty means no AUTH.
    pub password: String,
    pub database: i64,
}

impl RedisEndpoint {
    pub fn new(address: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            port,
            password: password.into(),
            database: 0,
        }
    }

    /// Reject endpoints that cannot possibly connect.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(PacketError::Configuration(
                "redis address must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(PacketError::Configuration(
                "redis port must not be 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a client for this endpoint. Does not connect.
    pub fn client(&self) -> Result<redis::Client> {
        self.validate()?;

        let password = (!self.password.is_empty()).then(|| self.password.clone());
        let info = redis::ConnectionInfo {
            addr: redis::ConnectionAddr::Tcp(self.address.clone(), self.port),
            redis: redis::RedisConnectionInfo {
                db: self.database,
                password,
                ..Default::default()
            },
        };

        Ok(redis::Client::open(info)?)
    }
}

/// Publishing side: a multiplexed async connection.
///
/// The socket closes once `close` has run and in-flight publishes finish.
pub struct RedisPublisher {
    conn: Mutex<Option<redis::aio::MultiplexedConnection>>,
}

impl RedisPublisher {
    pub async fn connect(client: &redis::Client) -> Result<Self> {
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }
}

impl Publisher for RedisPublisher {
    fn publish(&self, channel: &str, payload: Bytes) -> BoxFuture<'static, Result<()>> {
        let conn = self
            .conn
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let channel = channel.to_string();

        Box::pin(async move {
            let mut conn = conn.ok_or_else(|| {
                PacketError::Transport("publisher connection is closed".to_string())
            })?;
            conn.publish::<_, _, ()>(channel.as_str(), payload.as_ref())
                .await
                .map_err(PacketError::from)
        })
    }

    fn close(&self) {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner).take();
        drop(conn);
    }
}

/// Subscribing side: one pub/sub connection drained by a background task.
pub struct RedisSubscriber {
    sink: Mutex<Option<redis::aio::PubSubSink>>,
    routes: Arc<DashMap<String, Arc<dyn MessageListener>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    runtime: Handle,
}

impl RedisSubscriber {
    /// Open the pub/sub connection and start draining it on `runtime`.
    pub async fn connect(client: &redis::Client, runtime: Handle) -> Result<Self> {
        let pubsub = client.get_async_pubsub().await?;
        let (sink, mut stream) = pubsub.split();

        let routes: Arc<DashMap<String, Arc<dyn MessageListener>>> = Arc::new(DashMap::new());
        let task_routes = routes.clone();

        let reader = runtime.spawn(async move {
            while let Some(msg) = stream.next().await {
                let channel = msg.get_channel_name();
                // Clone out so the map shard is not held while the listener runs.
                let listener = task_routes.get(channel).map(|entry| entry.value().clone());
                match listener {
                    Some(listener) => listener
                        .on_message(channel, Bytes::copy_from_slice(msg.get_payload_bytes())),
                    None => tracing::trace!(channel, "message on unrouted channel"),
                }
            }
            tracing::debug!("redis pub/sub stream ended");
        });

        Ok(Self {
            sink: Mutex::new(Some(sink)),
            routes,
            reader: Mutex::new(Some(reader)),
            runtime,
        })
    }
}

impl Subscriber for RedisSubscriber {
    fn subscribe(&self, channel: &str, listener: Arc<dyn MessageListener>) -> Result<()> {
        let mut sink = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| {
                PacketError::Transport("subscriber connection is closed".to_string())
            })?;

        self.routes.insert(channel.to_string(), listener);

        let channel = channel.to_string();
        self.runtime.spawn(async move {
            if let Err(e) = sink.subscribe(channel.as_str()).await {
                tracing::error!(channel = %channel, error = %e, "failed to subscribe");
            }
        });
        Ok(())
    }

    fn close(&self) {
        let sink = self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
        let reader = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(reader) = reader {
            reader.abort();
        }
        self.routes.clear();
        drop(sink);
    }
}

impl Drop for RedisSubscriber {
    fn drop(&mut self) {
        self.close();
    }
}

/// Open the synchronous command connection.
///
/// Runs on the blocking pool since the sync client connects inline.
pub async fn connect_commands(client: &redis::Client) -> Result<redis::Connection> {
    let client = client.clone();
    tokio::task::spawn_blocking(move || client.get_connection())
        .await
        .map_err(|e| PacketError::Transport(format!("command connection task failed: {}", e)))?
        .map_err(PacketError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_defaults() {
        let endpoint = RedisEndpoint::new("localhost", 6379, "secret");
        assert_eq!(endpoint.database, 0);
        assert!(endpoint.validate().is_ok());
    }

    #[test]
    fn test_endpoint_rejects_empty_address() {
        let endpoint = RedisEndpoint::new("  ", 6379, "secret");
        assert!(endpoint.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_endpoint_rejects_port_zero() {
        let endpoint = RedisEndpoint::new("localhost", 0, "secret");
        assert!(endpoint.client().unwrap_err().is_configuration());
    }

    #[test]
    fn test_client_builds_without_connecting() {
        let endpoint = RedisEndpoint::new("127.0.0.1", 6379, "");
        let client = endpoint.client().unwrap();
        let info = client.get_connection_info();
        assert_eq!(info.redis.password, None);
        assert_eq!(info.redis.db, 0);
    }
}
