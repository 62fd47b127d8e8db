//! Ping over Redis - two bridges on one server.
//!
//! This example demonstrates:
//! - Connecting with `Bridge::create`
//! - Registering a handler and sending a packet across bridges
//! - Passing a raw command through `execute_operation`
//!
//! # Running
//!
//! ```sh
//! docker run --rm -p 6379:6379 redis:7
//! cargo run --example ping -- 127.0.0.1 6379
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use packet_bridge::codec::{PacketReader, PacketWriter};
use packet_bridge::error::CodecError;
use packet_bridge::{Bridge, Packet, PacketInfo};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Default, Debug)]
struct Ping {
    id: Uuid,
    sent_at_ms: i64,
}

impl Packet for Ping {
    const INFO: PacketInfo = PacketInfo::new("ping");

    fn write(&self, buf: &mut PacketWriter) {
        buf.write_uuid(&self.id).write_long(self.sent_at_ms);
    }

    fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), CodecError> {
        self.id = buf.read_uuid()?;
        self.sent_at_ms = buf.read_long()?;
        Ok(())
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("packet_bridge=debug,ping=info")
        .init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "127.0.0.1".to_string());
    let port: u16 = args.next().map(|p| p.parse()).transpose()?.unwrap_or(6379);
    let password = std::env::var("REDIS_PASSWORD").unwrap_or_default();

    let sender = Bridge::create(host.clone(), port, password.clone(), "demo").await?;
    let receiver = Bridge::create(host, port, password, "demo").await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    receiver.register_packet(move |ping: Ping| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(ping);
            Ok(())
        }
    })?;

    // Give the SUBSCRIBE a moment to reach the server.
    tokio::time::sleep(Duration::from_millis(200)).await;

    sender.send_packet(Ping {
        id: Uuid::new_v4(),
        sent_at_ms: now_ms(),
    })?;

    match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
        Ok(Some(ping)) => tracing::info!(
            id = %ping.id,
            latency_ms = now_ms() - ping.sent_at_ms,
            "pong"
        ),
        _ => tracing::warn!("no ping received within 5 seconds"),
    }

    let server = tokio::task::block_in_place(|| {
        sender.execute_operation(|conn| redis::cmd("INFO").arg("server").query::<String>(conn))
    })??;
    tracing::info!(lines = server.lines().count(), "INFO server");

    sender.shutdown();
    receiver.shutdown();
    Ok(())
}
