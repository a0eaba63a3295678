//! Store-and-forward telemetry core for the pumphouse irrigation controller
//!
//! Buffers pump events and memory stats in bounded per-category stores,
//! overflows full generations to flash in whole-batch files, and drains
//! them to a broker with at-most-one-in-flight delivery and retry on
//! failure. Designed around a single event-driven consumer task so that
//! transport callbacks, producers, and the watchdog never race on delivery
//! state.
//!
//! Key guarantees:
//! - Memory is bounded: each store holds at most its configured capacity.
//! - A record handed to the transport is never lost silently; the failure
//!   mode under disconnects and lost acks is duplicate delivery.
//! - Pump control never blocks on telemetry: flash and broker failures are
//!   absorbed with bounded, logged data loss.
//!
//! ```no_run
//! use std::sync::Arc;
//! use pumphouse_core::{build, StdFlash, SystemClock, TelemetryConfig};
//! # struct NullLink;
//! # impl pumphouse_core::Transport for NullLink {
//! #     fn publish(&mut self, _: &str, _: &[u8])
//! #         -> Result<pumphouse_core::MessageId, pumphouse_core::TransportError> {
//! #         Err(pumphouse_core::TransportError::NotConnected)
//! #     }
//! # }
//!
//! let config = TelemetryConfig::default();
//! let telemetry = build(
//!     &config,
//!     Arc::new(StdFlash::new("/store")),
//!     Arc::new(SystemClock),
//!     Box::new(NullLink),
//! );
//! let worker = telemetry.task.spawn().unwrap();
//! telemetry.handle.record_pump_event(true);
//! # let _ = worker;
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod errors;
pub mod events;
pub mod flash;
pub mod record;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod time;
pub mod transport;

// Public API
pub use config::TelemetryConfig;
pub use errors::{CodecError, ConfigError, FlashError, TransportError};
pub use events::{Event, EventSender, TelemetryHandle};
pub use flash::{Flash, StdFlash};
pub use record::{Category, MemoryReading, Payload, Record};
pub use scheduler::Scheduler;
pub use store::RecordStore;
pub use task::{build, EventTask, Telemetry};
pub use time::{Clock, FixedClock, SystemClock};
pub use transport::{MessageId, Transport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
