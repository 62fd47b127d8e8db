//! Bridge tuning.
//!
//! Every knob has a `DEFAULT_*` constant matching the stock behaviour: 5 s send
//! deadline, zstd level 3, one core worker growing to two, 30 s keep-alive.
//!
//! Loadable from JSON, with durations in milliseconds and missing fields
//! falling back to their defaults:
//!
//! ```
//! use std::time::Duration;
//! use packet_bridge::config::BridgeConfig;
//!
//! let config = BridgeConfig::from_json(r#"{ "send_timeout_ms": 250, "max_workers": 4 }"#).unwrap();
//! assert_eq!(config.send_timeout, Duration::from_millis(250));
//! assert_eq!(config.max_workers, 4);
//! assert_eq!(config.core_workers, 1);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::compression::{DEFAULT_COMPRESSION_LEVEL, DEFAULT_MAX_DECOMPRESSED_SIZE};
use crate::error::{PacketError, Result};
use crate::pool::{PoolConfig, DEFAULT_CORE_WORKERS, DEFAULT_KEEP_ALIVE, DEFAULT_MAX_WORKERS};

/// Default deadline for one send, measured from submission.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Tuning for a [`Bridge`](crate::bridge::Bridge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Deadline covering queue wait, encode, compress and publish.
    #[serde(rename = "send_timeout_ms", with = "millis")]
    pub send_timeout: Duration,

    /// zstd level for outbound payloads.
    pub compression_level: i32,

    /// Workers that stay alive while idle.
    pub core_workers: usize,

    /// Ceiling on concurrent workers.
    pub max_workers: usize,

    /// Idle time before a worker above the core count exits.
    #[serde(rename = "keep_alive_ms", with = "millis")]
    pub keep_alive: Duration,

    /// Inbound payloads inflating past this are rejected.
    pub max_decompressed_size: usize,
}

impl BridgeConfig {
    /// Parse a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.send_timeout.is_zero() {
            return Err(PacketError::Configuration(
                "send_timeout must be greater than zero".to_string(),
            ));
        }
        if !zstd::compression_level_range().contains(&self.compression_level) {
            return Err(PacketError::Configuration(format!(
                "compression_level {} is outside the zstd range {:?}",
                self.compression_level,
                zstd::compression_level_range()
            )));
        }
        if self.max_decompressed_size == 0 {
            return Err(PacketError::Configuration(
                "max_decompressed_size must be greater than zero".to_string(),
            ));
        }
        self.pool_config().validate()
    }

    /// Worker pool settings.
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            core_workers: self.core_workers,
            max_workers: self.max_workers,
            keep_alive: self.keep_alive,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            send_timeout: DEFAULT_SEND_TIMEOUT,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            core_workers: DEFAULT_CORE_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            keep_alive: DEFAULT_KEEP_ALIVE,
            max_decompressed_size: DEFAULT_MAX_DECOMPRESSED_SIZE,
        }
    }
}

/// `Duration` as whole milliseconds.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = BridgeConfig::default();
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.compression_level, 3);
        assert_eq!(config.core_workers, 1);
        assert_eq!(config.max_workers, 2);
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_empty_object_is_default() {
        let config = BridgeConfig::from_json("{}").unwrap();
        assert_eq!(config, BridgeConfig::default());
    }

    #[test]
    fn test_json_uses_milliseconds() {
        let config = BridgeConfig {
            send_timeout: Duration::from_millis(1500),
            keep_alive: Duration::from_secs(2),
            ..BridgeConfig::default()
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["send_timeout_ms"], 1500);
        assert_eq!(json["keep_alive_ms"], 2000);

        let back: BridgeConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        let err = BridgeConfig::from_json(r#"{ "core_workers": 3, "max_workers": 2 }"#).unwrap_err();
        assert!(err.is_configuration());

        let err = BridgeConfig::from_json(r#"{ "send_timeout_ms": 0 }"#).unwrap_err();
        assert!(err.is_configuration());

        let err = BridgeConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, PacketError::Json(_)));
    }

    #[test]
    fn test_rejects_bad_compression_level() {
        let config = BridgeConfig {
            compression_level: 1000,
            ..BridgeConfig::default()
        };
        assert!(config.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn test_pool_config() {
        let config = BridgeConfig {
            core_workers: 2,
            max_workers: 8,
            ..BridgeConfig::default()
        };
        let pool = config.pool_config();
        assert_eq!(pool.core_workers, 2);
        assert_eq!(pool.max_workers, 8);
        assert_eq!(pool.keep_alive, DEFAULT_KEEP_ALIVE);
    }
}
