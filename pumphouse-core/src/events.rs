//! Event queue and producer-facing handle
//!
//! ## Overview
//!
//! All delivery decisions are serialized through one bounded event queue
//! with a single consumer, the [`EventTask`](crate::task::EventTask).
//! Producers (the pump controller, the memory sampler) and the transport's
//! I/O thread only ever *post* events; none of them touch scheduler state
//! directly. That single-consumer rule is what lets the scheduler run
//! without any lock of its own.
//!
//! The queue is bounded and blocks producers when full, which doubles as
//! backpressure against a runaway producer.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;

use log::warn;

use crate::record::{MemoryReading, Record};
use crate::store::RecordStore;
use crate::time::Clock;
use crate::transport::MessageId;

/// Events consumed by the delivery task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A producer pushed at least one new record
    NewData,
    /// Transport link came up
    Connected,
    /// Transport link went down
    Disconnected,
    /// The broker acknowledged a published message
    Published(MessageId),
    /// Stop the event task (orderly teardown for hosts and tests)
    Shutdown,
}

/// Cloneable producer side of the event queue
#[derive(Clone)]
pub struct EventSender(SyncSender<Event>);

impl EventSender {
    /// Post an event, blocking while the queue is full
    ///
    /// A closed queue (task already stopped) drops the event with a log
    /// line; posting telemetry events must never be able to fail loudly.
    pub fn send(&self, event: Event) {
        if self.0.send(event).is_err() {
            warn!("event queue closed, dropping {event:?}");
        }
    }
}

/// Bounded event queue, one consumer
pub fn channel(depth: usize) -> (EventSender, Receiver<Event>) {
    let (tx, rx) = sync_channel(depth);
    (EventSender(tx), rx)
}

/// Producer-side API: push a record, then wake the delivery task
///
/// This is the whole boundary producers see. The pump controller calls
/// [`record_pump_event`](TelemetryHandle::record_pump_event) from its own
/// task; a periodic sampler calls
/// [`record_memory_stats`](TelemetryHandle::record_memory_stats).
#[derive(Clone)]
pub struct TelemetryHandle {
    pub(crate) pump: Arc<RecordStore>,
    pub(crate) memory: Arc<RecordStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) events: EventSender,
}

impl TelemetryHandle {
    /// Record that the pump switched on or off
    pub fn record_pump_event(&self, pump_on: bool) {
        self.pump.push(Record::pump(self.clock.now_unix(), pump_on));
        self.events.send(Event::NewData);
    }

    /// Record a memory/heap sample
    pub fn record_memory_stats(&self, reading: MemoryReading) {
        self.memory
            .push(Record::memory(self.clock.now_unix(), reading));
        self.events.send(Event::NewData);
    }
}
