//! Chat room - in-process broker, no Redis needed.
//!
//! This example demonstrates:
//! - Building bridges over `MemoryBroker`
//! - Enum and optional fields in a packet
//! - Reading dispatch counters after shutdown
//!
//! ```sh
//! cargo run --example chat
//! ```

use std::time::Duration;

use packet_bridge::codec::{PacketEnum, PacketReader, PacketWriter};
use packet_bridge::error::CodecError;
use packet_bridge::transport::MemoryBroker;
use packet_bridge::{Bridge, Packet, PacketInfo};

#[derive(Debug, Clone, Copy)]
enum Mood {
    Happy,
    Grumpy,
}

impl PacketEnum for Mood {
    fn name(&self) -> &'static str {
        match self {
            Mood::Happy => "HAPPY",
            Mood::Grumpy => "GRUMPY",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "HAPPY" => Some(Mood::Happy),
            "GRUMPY" => Some(Mood::Grumpy),
            _ => None,
        }
    }
}

#[derive(Default, Debug)]
struct ChatLine {
    author: Option<String>,
    text: Option<String>,
    mood: Option<Mood>,
}

impl Packet for ChatLine {
    const INFO: PacketInfo = PacketInfo::new("line").with_channel("room-1");

    fn write(&self, buf: &mut PacketWriter) {
        buf.write_nullable_string(self.author.as_deref())
            .write_nullable_string(self.text.as_deref())
            .write_optional(self.mood.as_ref(), |w, mood| {
                w.write_enum(mood);
            });
    }

    fn read(&mut self, buf: &mut PacketReader<'_>) -> Result<(), CodecError> {
        self.author = buf.read_string()?;
        self.text = buf.read_string()?;
        self.mood = buf.read_optional(|r| r.read_enum())?.flatten();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("packet_bridge=debug,chat=info")
        .init();

    let broker = MemoryBroker::new();
    let alice = Bridge::builder("chat").build_memory(&broker)?;
    let bob = Bridge::builder("chat").build_memory(&broker)?;

    bob.register_packet(|line: ChatLine| async move {
        tracing::info!(
            author = line.author.as_deref().unwrap_or("?"),
            mood = ?line.mood,
            "{}",
            line.text.as_deref().unwrap_or("")
        );
        Ok(())
    })?;

    for (text, mood) in [("hi bob", Some(Mood::Happy)), ("it is monday", Some(Mood::Grumpy)), ("bye", None)] {
        alice.send_packet(ChatLine {
            author: Some("alice".to_string()),
            text: Some(text.to_string()),
            mood,
        })?;
    }

    tokio::time::sleep(Duration::from_millis(100)).await;

    alice.shutdown();
    bob.shutdown();
    tracing::info!(sent = ?alice.stats(), received = ?bob.stats(), "done");
    Ok(())
}
