//! Telemetry configuration
//!
//! Capacities, topics, and timeouts are fixed at startup. The controller
//! loads this from a JSON file (remote configuration updates rewrite that
//! file and restart the subsystem); every field has a default so a missing
//! or partial file still yields a working setup.

use std::fs;
use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use log::warn;
use serde::Deserialize;

use crate::errors::ConfigError;

/// Startup configuration for the telemetry subsystem
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Device id embedded in every serialized record
    pub device_id: u32,
    /// Pump-event store capacity (records per batch file)
    pub pump_capacity: usize,
    /// Memory-stat store capacity (records per batch file)
    pub memory_capacity: usize,
    /// Base directory for batch files, one subdirectory per category
    pub data_dir: String,
    /// Local timezone as seconds east of UTC, used for `ts` formatting
    pub utc_offset_secs: i32,
    /// Broker topic for pump events
    pub pump_topic: String,
    /// Broker topic for memory stats
    pub memory_topic: String,
    /// Ack watchdog: how long a send may stay unacknowledged (seconds)
    pub ack_timeout_secs: u64,
    /// Wait while disconnected or idle before re-checking (seconds)
    pub idle_timeout_secs: u64,
    /// Bounded event queue depth; producers block when it is full
    pub event_queue_depth: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            device_id: 0,
            pump_capacity: 64,
            memory_capacity: 64,
            data_dir: "store/log_data".into(),
            utc_offset_secs: 0,
            pump_topic: "telemetry/pump".into(),
            memory_topic: "telemetry/memory".into(),
            ack_timeout_secs: 2 * 60,
            idle_timeout_secs: 2 * 60 * 60,
            event_queue_depth: 16,
        }
    }
}

impl TelemetryConfig {
    /// Load from a JSON file; absent fields take their defaults
    pub fn from_json_file(path: &str) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.into(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.into(),
            source: e,
        })
    }

    /// Configured timezone; falls back to UTC on an out-of-range offset
    pub fn tz_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_secs).unwrap_or_else(|| {
            warn!("utc_offset_secs {} out of range, using UTC", self.utc_offset_secs);
            Utc.fix()
        })
    }

    /// Ack watchdog timeout as a [`Duration`]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    /// Idle wait as a [`Duration`]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_sane() {
        let config = TelemetryConfig::default();
        assert!(config.pump_capacity > 0);
        assert!(config.idle_timeout() > config.ack_timeout());
        assert_eq!(config.tz_offset().local_minus_utc(), 0);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"device_id": 7, "pump_capacity": 3}}"#).unwrap();
        file.flush().unwrap();

        let config = TelemetryConfig::from_json_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.device_id, 7);
        assert_eq!(config.pump_capacity, 3);
        assert_eq!(config.memory_capacity, TelemetryConfig::default().memory_capacity);
    }

    #[test]
    fn bad_offset_falls_back_to_utc() {
        let config = TelemetryConfig {
            utc_offset_secs: 999_999_999,
            ..Default::default()
        };
        assert_eq!(config.tz_offset().local_minus_utc(), 0);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(TelemetryConfig::from_json_file("/nonexistent/telemetry.json").is_err());
    }
}
