//! Telemetry record model and fixed-width binary codec
//!
//! ## Overview
//!
//! A [`Record`] is one observation produced by the controller: a pump
//! switching on or off, or a periodic memory/heap sample. Records are
//! immutable once created and carry the wall-clock second they were taken
//! (which may be inaccurate before time sync completes).
//!
//! ## Two encodings
//!
//! Records exist in two forms with different lifetimes:
//!
//! 1. **Storage form**: a compact fixed 33-byte binary image used for the
//!    in-memory store and for flash batch files. Fixed width keeps batch
//!    files exactly `capacity * RECORD_LEN` bytes so a whole generation can
//!    be written and reloaded with a single I/O call.
//! 2. **Wire form**: a JSON object built only at send time, carrying the
//!    device id and a formatted ISO-8601 timestamp. The broker never sees
//!    the storage form.
//!
//! ```text
//! Storage layout (33 bytes, little-endian):
//! ├── tag: 1 byte (category discriminant)
//! ├── timestamp: 8 bytes (unix seconds)
//! └── payload: 24 bytes (zero padded)
//!     pump:   [on: 1 byte]
//!     memory: [free_heap: 4][min_free_heap: 4][storage_total: 8][storage_used: 8]
//! ```

use chrono::{DateTime, FixedOffset};
use serde_json::json;

use crate::errors::CodecError;

/// Encoded size of one record in a batch file
pub const RECORD_LEN: usize = 33;

/// Telemetry categories, in delivery priority order
///
/// Pump events document what the controller actually did to the field and
/// are drained before housekeeping stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Category {
    /// Pump switched on or off
    PumpEvent = 0,
    /// Periodic heap and storage sample
    MemoryStat = 1,
}

impl Category {
    /// All categories, highest delivery priority first
    pub const fn all() -> [Category; 2] {
        [Category::PumpEvent, Category::MemoryStat]
    }

    /// Directory name for this category's batch files
    pub const fn dir_name(&self) -> &'static str {
        match self {
            Category::PumpEvent => "pump",
            Category::MemoryStat => "mem",
        }
    }

    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Category::PumpEvent),
            1 => Some(Category::MemoryStat),
            _ => None,
        }
    }
}

/// Memory/heap sample as reported by the producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryReading {
    /// Free heap at sample time (bytes)
    pub free_heap: u32,
    /// Low-water mark of free heap since boot (bytes)
    pub min_free_heap: u32,
    /// Total bytes of the flash store partition
    pub storage_total: u64,
    /// Used bytes of the flash store partition
    pub storage_used: u64,
}

/// Category-specific observation data
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload {
    /// Pump state after the transition
    Pump {
        /// `true` for start, `false` for stop
        on: bool,
    },
    /// Memory/heap sample
    Memory(MemoryReading),
}

/// One telemetry observation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record {
    /// Unix seconds at observation time
    pub timestamp: u64,
    /// Category-specific observation data
    pub payload: Payload,
}

impl Record {
    /// Pump start/stop record
    pub fn pump(timestamp: u64, on: bool) -> Self {
        Self {
            timestamp,
            payload: Payload::Pump { on },
        }
    }

    /// Memory sample record
    pub fn memory(timestamp: u64, reading: MemoryReading) -> Self {
        Self {
            timestamp,
            payload: Payload::Memory(reading),
        }
    }

    /// Category implied by the payload
    pub fn category(&self) -> Category {
        match self.payload {
            Payload::Pump { .. } => Category::PumpEvent,
            Payload::Memory(_) => Category::MemoryStat,
        }
    }

    /// Encode into the fixed storage form
    pub fn encode(&self) -> [u8; RECORD_LEN] {
        let mut buf = [0u8; RECORD_LEN];
        buf[0] = self.category() as u8;
        buf[1..9].copy_from_slice(&self.timestamp.to_le_bytes());
        match self.payload {
            Payload::Pump { on } => {
                buf[9] = on as u8;
            }
            Payload::Memory(m) => {
                buf[9..13].copy_from_slice(&m.free_heap.to_le_bytes());
                buf[13..17].copy_from_slice(&m.min_free_heap.to_le_bytes());
                buf[17..25].copy_from_slice(&m.storage_total.to_le_bytes());
                buf[25..33].copy_from_slice(&m.storage_used.to_le_bytes());
            }
        }
        buf
    }

    /// Decode from the fixed storage form
    pub fn decode(buf: &[u8; RECORD_LEN]) -> Result<Self, CodecError> {
        let category = Category::from_tag(buf[0]).ok_or(CodecError::UnknownTag(buf[0]))?;
        let timestamp = u64::from_le_bytes([
            buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7], buf[8],
        ]);
        let payload = match category {
            Category::PumpEvent => Payload::Pump { on: buf[9] != 0 },
            Category::MemoryStat => Payload::Memory(MemoryReading {
                free_heap: u32::from_le_bytes([buf[9], buf[10], buf[11], buf[12]]),
                min_free_heap: u32::from_le_bytes([buf[13], buf[14], buf[15], buf[16]]),
                storage_total: u64::from_le_bytes([
                    buf[17], buf[18], buf[19], buf[20], buf[21], buf[22], buf[23], buf[24],
                ]),
                storage_used: u64::from_le_bytes([
                    buf[25], buf[26], buf[27], buf[28], buf[29], buf[30], buf[31], buf[32],
                ]),
            }),
        };
        Ok(Self { timestamp, payload })
    }

    /// Serialize to the wire form handed to the transport
    ///
    /// Built at send time only. Field names are part of the broker contract
    /// and must not change.
    pub fn to_wire(&self, device_id: u32, tz: FixedOffset) -> String {
        let ts = format_timestamp(self.timestamp, tz);
        let value = match self.payload {
            Payload::Pump { on } => json!({
                "id": device_id,
                "ts": ts,
                "status": if on { "start" } else { "stop" },
            }),
            Payload::Memory(m) => json!({
                "id": device_id,
                "ts": ts,
                "free_heap_size": m.free_heap,
                "min_free_heap_size": m.min_free_heap,
                "store_total_bytes": m.storage_total,
                "store_used_bytes": m.storage_used,
            }),
        };
        value.to_string()
    }
}

/// ISO-8601 with microsecond precision and numeric offset,
/// e.g. `2024-06-01T12:30:00.000000+0200`
fn format_timestamp(unix_secs: u64, tz: FixedOffset) -> String {
    let utc: DateTime<chrono::Utc> =
        DateTime::from_timestamp(unix_secs as i64, 0).unwrap_or_default();
    utc.with_timezone(&tz)
        .format("%Y-%m-%dT%H:%M:%S%.6f%z")
        .to_string()
}
