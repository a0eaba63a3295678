//! Error types for the telemetry subsystem
//!
//! Nothing in this subsystem is fatal. The design philosophy is best-effort
//! telemetry: flash and transport failures are logged and retried or
//! absorbed with bounded data loss, and pump control must never block on a
//! logging failure. Errors here exist so callers can log with context, not
//! so they can abort.

use thiserror::Error;

/// Flash filesystem failure, tagged with the path involved
#[derive(Debug, Error)]
pub enum FlashError {
    /// Underlying filesystem call failed
    #[error("flash i/o on {path}: {source}")]
    Io {
        /// Store-relative path of the file or directory involved
        path: String,
        /// The failing filesystem call's error
        #[source]
        source: std::io::Error,
    },
}

impl FlashError {
    /// Tag an I/O error with the path it occurred on
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Storage-form decode failure
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// First byte is not a known category tag
    #[error("unknown record tag {0:#04x}")]
    UnknownTag(u8),
}

/// Transport-side publish failure
///
/// Both variants are transient: the scheduler restores the popped record
/// and retries on the next advance or reconnection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// The link is down; normal offline case
    #[error("transport not connected")]
    NotConnected,
    /// The transport refused the message despite being connected
    #[error("publish rejected: {0}")]
    Rejected(&'static str),
}

/// Configuration load failure
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file missing or unreadable
    #[error("cannot read config file {path}: {source}")]
    Io {
        /// Path of the config file
        path: String,
        /// The failing read's error
        #[source]
        source: std::io::Error,
    },
    /// Config file is not valid JSON for [`TelemetryConfig`](crate::TelemetryConfig)
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        /// Path of the config file
        path: String,
        /// The deserialization error
        #[source]
        source: serde_json::Error,
    },
}
